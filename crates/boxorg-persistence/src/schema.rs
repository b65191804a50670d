//! Esquema Diesel escrito a mano; coincide con
//! `migrations/2024-05-01-000000_create_organizer`.

diesel::table! {
    workspaces (id) {
        id -> Uuid,
        name -> Text,
        owner_id -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    workspace_members (workspace_id, user_id) {
        workspace_id -> Uuid,
        user_id -> Uuid,
        role -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    locations (id) {
        id -> Uuid,
        workspace_id -> Uuid,
        name -> Text,
        path -> Text,
        is_deleted -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    boxes (id) {
        id -> Uuid,
        workspace_id -> Uuid,
        location_id -> Nullable<Uuid>,
        name -> Text,
        description -> Nullable<Text>,
        tags -> Array<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    qr_codes (id) {
        id -> Uuid,
        workspace_id -> Uuid,
        short_id -> Text,
        box_id -> Nullable<Uuid>,
        status -> Text,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(workspace_members -> workspaces (workspace_id));
diesel::joinable!(locations -> workspaces (workspace_id));
diesel::joinable!(boxes -> locations (location_id));
diesel::joinable!(qr_codes -> boxes (box_id));

diesel::allow_tables_to_appear_in_same_query!(
    workspaces,
    workspace_members,
    locations,
    boxes,
    qr_codes,
);

// location.rs
use crate::path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fila de ubicación tal como la persiste el almacén.
///
/// No existe columna `parent_id`: el padre se deriva siempre del `path`
/// comparándolo contra los paths de las demás filas del workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub workspace_id: Uuid,
    /// Nombre tal como lo escribió el usuario (se conserva el alfabeto
    /// original para mostrarlo).
    pub name: String,
    pub path: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Location {
    /// Número de segmentos del path (`root.garaz` = 2).
    pub fn depth(&self) -> usize {
        path::path_depth(&self.path)
    }

    /// Path del padre estructural (`root` para ubicaciones de primer nivel).
    pub fn parent_path(&self) -> &str {
        path::get_parent_path(&self.path)
    }

    /// Ubicación de primer nivel (`root.<slug>`).
    pub fn is_root_level(&self) -> bool {
        self.parent_path() == path::ROOT_SEGMENT
    }

    /// Convierte la fila al DTO expuesto, con el `parent_id` ya derivado.
    pub fn to_dto(&self, parent_id: Option<Uuid>) -> LocationDto {
        LocationDto { id: self.id,
                      workspace_id: self.workspace_id,
                      parent_id,
                      name: self.name.clone(),
                      path: self.path.clone(),
                      is_deleted: self.is_deleted,
                      created_at: self.created_at,
                      updated_at: self.updated_at }
    }
}

/// Representación pública de una ubicación (`GET locations`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationDto {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub path: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Nodo del árbol reconstruido en memoria.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationNode {
    pub location: LocationDto,
    pub children: Vec<LocationNode>,
}

impl LocationNode {
    /// Cantidad de nodos en el subárbol, incluyendo este.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(LocationNode::size).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(path: &str) -> Location {
        let now = Utc::now();
        Location { id: Uuid::new_v4(),
                   workspace_id: Uuid::new_v4(),
                   name: "x".into(),
                   path: path.into(),
                   is_deleted: false,
                   created_at: now,
                   updated_at: now }
    }

    #[test]
    fn root_level_detection() {
        assert!(location("root.garaz").is_root_level());
        assert!(!location("root.garaz.polka_a").is_root_level());
        assert_eq!(location("root.garaz.polka_a").depth(), 3);
    }

    #[test]
    fn dto_carries_derived_parent() {
        let loc = location("root.garaz.polka_a");
        let parent = Uuid::new_v4();
        let dto = loc.to_dto(Some(parent));
        assert_eq!(dto.parent_id, Some(parent));
        assert_eq!(dto.path, loc.path);
    }
}

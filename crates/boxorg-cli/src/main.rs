//! CLI de operación sobre el backend Postgres.
//!
//! Cada subcomando imprime JSON por stdout. Códigos de salida:
//! 0 ok, 2 uso incorrecto, 4 no encontrado o rechazado, 5 error interno.
use boxorg_core::{BoxService, CascadeDeletionOrchestrator, LocationFilter, LocationTreeService, OrganizerError,
                  QrCodeLifecycleManager, RowStore, WorkspaceService};
use boxorg_domain::dto::{CreateBoxRequest, GenerateQrCodesRequest, ListLocationsQuery, ListQrCodesQuery, RequestContext,
                         DEFAULT_QR_BATCH_MAX};
use boxorg_domain::QrStatus;
use clap::{Args, Parser, Subcommand};
use log::{debug, error};
use serde::Serialize;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "boxorg")]
#[command(about = "Organizador de cajas: ubicaciones, cajas y códigos QR por workspace")]
struct Cli {
    /// Máximo de códigos por lote.
    #[arg(long, env = "BOXORG_QR_BATCH_MAX", default_value_t = DEFAULT_QR_BATCH_MAX)]
    qr_batch_max: u32,

    /// Longitud de los short ids generados.
    #[arg(long, env = "BOXORG_SHORT_ID_LEN", default_value_t = boxorg_core::short_id::DEFAULT_SHORT_ID_LEN)]
    short_id_len: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(subcommand)]
    Workspace(WorkspaceCmd),
    #[command(subcommand)]
    Location(LocationCmd),
    #[command(subcommand)]
    Box(BoxCmd),
    #[command(subcommand)]
    Qr(QrCmd),
}

#[derive(Args, Debug)]
struct WorkspaceArg {
    #[arg(long, short = 'w')]
    workspace: Uuid,
}

#[derive(Subcommand, Debug)]
enum WorkspaceCmd {
    Create {
        #[arg(long)]
        owner: Uuid,
        #[arg(long)]
        name: String,
    },
    List {
        #[arg(long)]
        user: Uuid,
    },
    /// Borrado en cascada; sólo el propietario.
    Delete {
        #[arg(long)]
        caller: Uuid,
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand, Debug)]
enum LocationCmd {
    Create {
        #[command(flatten)]
        ws: WorkspaceArg,
        #[arg(long)]
        parent: Option<Uuid>,
        #[arg(long)]
        name: String,
    },
    List {
        #[command(flatten)]
        ws: WorkspaceArg,
        #[arg(long)]
        parent: Option<Uuid>,
    },
    Tree {
        #[command(flatten)]
        ws: WorkspaceArg,
    },
    Delete {
        #[command(flatten)]
        ws: WorkspaceArg,
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand, Debug)]
enum BoxCmd {
    Create {
        #[command(flatten)]
        ws: WorkspaceArg,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        location: Option<Uuid>,
        #[arg(long)]
        qr: Option<Uuid>,
    },
    List {
        #[command(flatten)]
        ws: WorkspaceArg,
        #[arg(long, conflicts_with = "unassigned")]
        location: Option<Uuid>,
        #[arg(long)]
        unassigned: bool,
    },
    Delete {
        #[command(flatten)]
        ws: WorkspaceArg,
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand, Debug)]
enum QrCmd {
    Generate {
        #[command(flatten)]
        ws: WorkspaceArg,
        #[arg(long, short = 'n')]
        quantity: u32,
    },
    List {
        #[command(flatten)]
        ws: WorkspaceArg,
        /// `generated` o `assigned`.
        #[arg(long)]
        status: Option<QrStatus>,
    },
    /// Resolución de un escaneo.
    Lookup { short_id: String },
    Release {
        #[command(flatten)]
        ws: WorkspaceArg,
        #[arg(long)]
        id: Uuid,
    },
}

fn to_json<T: Serialize>(value: T) -> Result<serde_json::Value, OrganizerError> {
    serde_json::to_value(value).map_err(|e| {
                                   error!("json encode: {e}");
                                   OrganizerError::Storage
                               })
}

fn run<S: RowStore>(store: &S, cli: &Cli) -> Result<serde_json::Value, OrganizerError> {
    match &cli.command {
        Command::Workspace(cmd) => {
            let workspaces = WorkspaceService::new(store);
            match cmd {
                WorkspaceCmd::Create { owner, name } => to_json(workspaces.create(*owner, name)?),
                WorkspaceCmd::List { user } => to_json(workspaces.list_for_user(*user)?),
                WorkspaceCmd::Delete { caller, id } => {
                    let ctx = RequestContext { user_id: *caller,
                                               workspace_id: *id };
                    to_json(CascadeDeletionOrchestrator::new(store).delete_workspace_in_context(&ctx)?)
                }
            }
        }
        Command::Location(cmd) => {
            let locations = LocationTreeService::new(store);
            match cmd {
                LocationCmd::Create { ws, parent, name } => to_json(locations.create(ws.workspace, *parent, name)?),
                LocationCmd::List { ws, parent } => {
                    let query = ListLocationsQuery { workspace_id: ws.workspace,
                                                     parent_id: *parent };
                    to_json(locations.list_from_query(&query)?)
                }
                LocationCmd::Tree { ws } => to_json(locations.tree(ws.workspace)?),
                LocationCmd::Delete { ws, id } => to_json(locations.delete(ws.workspace, *id)?),
            }
        }
        Command::Box(cmd) => {
            let boxes = BoxService::new(store);
            match cmd {
                BoxCmd::Create { ws,
                                 name,
                                 description,
                                 tags,
                                 location,
                                 qr, } => {
                    let request = CreateBoxRequest { workspace_id: ws.workspace,
                                                     name: name.clone(),
                                                     description: description.clone(),
                                                     tags: tags.clone(),
                                                     location_id: *location,
                                                     qr_code_id: *qr };
                    to_json(boxes.create(ws.workspace, &request)?)
                }
                BoxCmd::List { ws, location, unassigned } => {
                    let filter = match (location, unassigned) {
                        (Some(id), _) => LocationFilter::Id(*id),
                        (None, true) => LocationFilter::Unassigned,
                        (None, false) => LocationFilter::Any,
                    };
                    to_json(boxes.list(ws.workspace, filter)?)
                }
                BoxCmd::Delete { ws, id } => to_json(boxes.delete(ws.workspace, *id)?),
            }
        }
        Command::Qr(cmd) => {
            let qr = QrCodeLifecycleManager::new(store).with_short_id_len(cli.short_id_len);
            match cmd {
                QrCmd::Generate { ws, quantity } => {
                    let request = GenerateQrCodesRequest { workspace_id: ws.workspace,
                                                           quantity: *quantity };
                    to_json(qr.generate_from_request(&request, cli.qr_batch_max)?)
                }
                QrCmd::List { ws, status } => {
                    let query = ListQrCodesQuery { workspace_id: ws.workspace,
                                                   status: *status };
                    to_json(qr.list_from_query(&query)?)
                }
                QrCmd::Lookup { short_id } => match qr.get_by_short_id(short_id)? {
                    Some(code) => to_json(code),
                    None => {
                        eprintln!("[boxorg qr] short id no encontrado: {short_id}");
                        std::process::exit(4);
                    }
                },
                QrCmd::Release { ws, id } => to_json(qr.release(ws.workspace, *id)?),
            }
        }
    }
}

fn main() {
    // Cargar .env si existe para obtener DATABASE_URL
    let _ = dotenvy::dotenv();
    env_logger::init();
    let cli = Cli::parse();
    debug!("{cli:?}");

    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("[boxorg] requiere DATABASE_URL para operar contra backend persistente");
        std::process::exit(4);
    }
    let store = match boxorg_persistence::build_dev_store_from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("[boxorg] pool error: {e}");
            std::process::exit(5);
        }
    };

    match run(&store, &cli) {
        Ok(value) => {
            println!("{value:#}");
            std::process::exit(0);
        }
        Err(e) => {
            let body = e.to_api_error();
            eprintln!("{}", serde_json::to_string(&body).unwrap_or_else(|_| body.message.clone()));
            std::process::exit(if body.status >= 500 { 5 } else { 4 });
        }
    }
}

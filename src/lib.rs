pub mod admin;
mod config;
pub mod entities;
pub mod inventory;
mod net;
pub mod telemetry;

pub use net::client::{ClientEvent, StashClient};
pub use net::packet::{PacketReader, PacketWriter};
pub use net::server::{run_server, AdminRequest, ServerConfig, ServerControl};
pub use net::wire::{ContainerSnapshot, MoveItemRequest, SnapshotRecord, SplitStackRequest};

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use admin::commands::{parse_console_command, ConsoleCommand};
use entities::catalog::ItemCatalog;

const ADMIN_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

pub fn run(args: &[String]) -> Result<(), String> {
    let config = config::AppConfig::from_args(args)?;
    telemetry::logging::init(&config.root)?;

    let catalog = match config.catalog_path.as_ref() {
        Some(path) => ItemCatalog::from_yaml_file(path)?,
        None => ItemCatalog::builtin(),
    };
    let catalog = Arc::new(catalog);

    telemetry::logging::log_game(&format!(
        "startup: bind={}, items={}, max_clients={}",
        config.bind_addr,
        catalog.len(),
        config.max_clients
    ));
    println!("stashd: shared stash server");
    println!("- bind: {}", config.bind_addr);
    println!("- catalog: {} items", catalog.len());
    if config.max_clients > 0 {
        println!("- max clients: {}", config.max_clients);
    }

    let manager = inventory::manager::InventoryManager::new(Arc::clone(&catalog));
    let server_config = ServerConfig {
        bind_addr: config.bind_addr.clone(),
        max_clients: config.max_clients,
        ..ServerConfig::default()
    };
    let listener = std::net::TcpListener::bind(&server_config.bind_addr)
        .map_err(|err| format!("bind {} failed: {}", server_config.bind_addr, err))?;
    let control = Arc::new(ServerControl::new());
    let (admin_tx, admin_rx) = mpsc::channel();
    let server_control = Arc::clone(&control);
    let server_handle = std::thread::spawn(move || {
        net::server::serve(listener, server_config, manager, server_control, admin_rx)
    });

    println!("type 'help' for commands");
    run_console(&catalog, &admin_tx);

    control.request_shutdown();
    drop(admin_tx);
    match server_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => eprintln!("server error: {}", err),
        Err(_) => eprintln!("server thread panicked"),
    }
    Ok(())
}

/// Blocks on stdin until `quit` or end of input.
fn run_console(catalog: &ItemCatalog, admin: &mpsc::Sender<AdminRequest>) {
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                eprintln!("stashd: console read failed: {}", err);
                break;
            }
        }
        let command = match parse_console_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                println!("{}", err);
                continue;
            }
        };
        match command {
            ConsoleCommand::Help => print_help(),
            ConsoleCommand::Items => print_items(catalog),
            ConsoleCommand::Give {
                identity,
                item_id,
                count,
            } => give_item(admin, identity, item_id, count),
            ConsoleCommand::List => list_players(admin),
            ConsoleCommand::Quit => break,
            ConsoleCommand::Unknown(name) => {
                println!("unknown command: {} (type 'help' for commands)", name)
            }
        }
    }
}

fn print_help() {
    println!("available commands:");
    println!("  help                              - show this help");
    println!("  items                             - list the item catalog");
    println!("  give <identity> <item-id> <count> - put items in a player's inventory");
    println!("  list                              - list connected players");
    println!("  quit                              - stop the server");
}

fn print_items(catalog: &ItemCatalog) {
    println!("available items ({}):", catalog.len());
    for item in catalog.definitions() {
        println!(
            "  [{}] {} ({}x{}, stack: {})",
            item.id.0, item.name, item.footprint.width, item.footprint.height, item.stack_max
        );
    }
}

fn give_item(admin: &mpsc::Sender<AdminRequest>, identity: String, item_id: u32, count: u32) {
    let (reply_tx, reply_rx) = mpsc::channel();
    let request = AdminRequest::GiveItem {
        identity,
        item_id,
        count,
        reply: reply_tx,
    };
    if admin.send(request).is_err() {
        println!("server is not running");
        return;
    }
    match reply_rx.recv_timeout(ADMIN_REPLY_TIMEOUT) {
        Ok(Ok(summary)) => println!("{}", summary),
        Ok(Err(err)) => println!("give failed: {}", err),
        Err(_) => println!("server did not answer"),
    }
}

fn list_players(admin: &mpsc::Sender<AdminRequest>) {
    let (reply_tx, reply_rx) = mpsc::channel();
    if admin
        .send(AdminRequest::ListPlayers { reply: reply_tx })
        .is_err()
    {
        println!("server is not running");
        return;
    }
    match reply_rx.recv_timeout(ADMIN_REPLY_TIMEOUT) {
        Ok(players) if players.is_empty() => println!("no players connected"),
        Ok(players) => {
            println!("connected players ({}):", players.len());
            for player in players {
                println!("  - {}", player);
            }
        }
        Err(_) => println!("server did not answer"),
    }
}

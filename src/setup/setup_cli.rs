use clap::{Parser, Subcommand};
use desa_backend::config::Config;
use desa_backend::models::db_operations::users_db_operations;
use desa_backend::models::Role;
use desa_backend::setup::db_setup;
use redb::Database;
use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "setup_cli", author, version, about = "A CLI for initial setup of the village website backend.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the .env configuration file.
    #[arg(long, required = true, value_name = "FILE")]
    env_file: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand, Debug)]
enum DbAction {
    /// Creates `content`, `activity`, or both when omitted.
    Setup { db_type: Option<String> },
}

#[derive(Subcommand, Debug)]
enum AdminAction {
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        /// `admin` or `super_admin`.
        #[arg(long, default_value = "super_admin")]
        role: String,
    },
    List,
    ChangePassword {
        #[arg(long)]
        username: String,
        #[arg(long)]
        new_password: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = Config::from_env(&cli.env_file).expect("FATAL: Failed to load or parse configuration.");

    match &cli.command {
        Commands::Db { action } => match action {
            DbAction::Setup { db_type } => match db_type.as_deref() {
                Some("content") => setup_content_database(&config),
                Some("activity") => setup_activity_database(&config),
                Some(other) => eprintln!("❌ Error: Unknown database type '{}'. Use 'content' or 'activity'.", other),
                None => {
                    setup_content_database(&config);
                    setup_activity_database(&config);
                }
            },
        },
        Commands::Admin { action } => match action {
            AdminAction::Create { username, password, role } => create_account(&config, username, password, role),
            AdminAction::List => list_accounts(&config),
            AdminAction::ChangePassword { username, new_password } => change_password(&config, username, new_password),
        },
    }
}

fn setup_content_database(config: &Config) {
    let db_path = config.content_db_path();
    println!("\nSetting up content database at '{}'...", db_path.display());

    if let Some(parent_dir) = db_path.parent() {
        fs::create_dir_all(parent_dir).expect("Could not create database directory.");
    }

    // Every statement is idempotent, so re-running only adds what is missing.
    let mut conn = Connection::open(&db_path).expect("Could not create content database file.");
    match db_setup::setup_content_db(&mut conn) {
        Ok(_) => println!("✅ Content database setup completed successfully."),
        Err(e) => eprintln!("❌ Error setting up content database: {}", e),
    }
}

fn setup_activity_database(config: &Config) {
    let db_path = config.activity_db_path();
    if db_path.exists() {
        println!("ℹ️ Activity database already exists at '{}'. Skipping creation.", db_path.display());
        return;
    }
    println!("\nSetting up activity database at '{}'...", db_path.display());

    if let Some(parent_dir) = db_path.parent() {
        fs::create_dir_all(parent_dir).expect("Could not create database directory.");
    }

    let db = Database::create(&db_path).expect("Failed to create activity database file.");
    match db_setup::setup_activity_db(&db) {
        Ok(_) => println!("✅ Activity database setup completed successfully."),
        Err(e) => eprintln!("❌ Error setting up activity database: {}", e),
    }
}

fn open_content_db(config: &Config) -> Option<Connection> {
    let db_path = config.content_db_path();
    if !db_path.exists() {
        eprintln!("❌ Error: Content database not found at '{}'. Please run `setup_cli db setup` first.", db_path.display());
        return None;
    }
    match Connection::open(&db_path) {
        Ok(conn) => Some(conn),
        Err(e) => {
            eprintln!("❌ Error opening content database: {}", e);
            None
        }
    }
}

fn create_account(config: &Config, username: &str, password: &str, role: &str) {
    let Some(role) = Role::parse(role) else {
        eprintln!("❌ Error: Unknown role '{}'. Use 'admin' or 'super_admin'.", role);
        return;
    };
    let Some(conn) = open_content_db(config) else { return };

    match users_db_operations::create_user(&conn, username.trim(), password, role) {
        Ok(_) => println!("✅ {} account '{}' created successfully.", role, username),
        Err(e) => eprintln!("❌ Error creating account: {}. It might be because the username already exists.", e),
    }
}

fn list_accounts(config: &Config) {
    let Some(conn) = open_content_db(config) else { return };
    match users_db_operations::read_all_users(&conn) {
        Ok(users) => {
            println!("Listing accounts:");
            for user in users {
                let state = if user.is_active { "active" } else { "inactive" };
                println!("- {} ({}, {})", user.username, user.role, state);
            }
        }
        Err(e) => eprintln!("❌ Error fetching accounts: {}", e),
    }
}

fn change_password(config: &Config, username: &str, new_password: &str) {
    let Some(conn) = open_content_db(config) else { return };
    match users_db_operations::update_password(&conn, username, new_password) {
        Ok(0) => eprintln!("❌ Error: No account named '{}' found.", username),
        Ok(_) => println!("✅ Password for '{}' changed successfully.", username),
        Err(e) => eprintln!("❌ Error updating password: {}", e),
    }
}

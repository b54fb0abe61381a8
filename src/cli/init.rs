use std::path::PathBuf;

use rand::Rng;

use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::models::Role;
use crate::settings::{load_settings, save_settings, shellexpand_path};

pub fn run(data_dir: Option<String>, user: Option<String>, role: Option<Role>) -> Result<()> {
    let mut settings = load_settings();

    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    if let Some(user) = user {
        settings.user_id = user.trim().to_string();
    }
    if let Some(role) = role {
        settings.role = role.as_str().to_string();
    }
    if settings.signing_secret.is_empty() {
        settings.signing_secret = generate_secret();
    }

    save_settings(&settings)?;

    let resolved = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&resolved)?;
    std::fs::create_dir_all(settings.objects_dir())?;
    std::fs::create_dir_all(resolved.join("exports"))?;

    let conn = get_connection(&settings.db_path())?;
    init_db(&conn)?;

    println!("Initialized haulbook at {}", resolved.display());
    if settings.user_id.is_empty() {
        println!("No default user set. Pass --as-user or re-run with --user <id>.");
    } else {
        println!("Acting as {} ({})", settings.user_id, settings.role);
    }
    Ok(())
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

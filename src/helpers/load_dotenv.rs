use std::env;
use std::path::PathBuf;

use crate::constants::envvars;

/// Loads `./.env`, then `$SI_DATA_DIR/.env`. Runs before the logger exists;
/// notices go to stderr since stdout belongs to command output.
pub fn load_dotenv() {
    if dotenv::dotenv().is_ok() {
        eprintln!("Loaded local .env")
    }
    if let Ok(data_dir) = env::var(envvars::DATA_DIR) {
        let data_dir_dotenv = PathBuf::from(data_dir).join(".env");
        if dotenv::from_path(&data_dir_dotenv).is_ok() {
            eprintln!("Loaded {}", data_dir_dotenv.display());
        }
    }
}

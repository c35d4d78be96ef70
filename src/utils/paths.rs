use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

static APP_DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

pub fn get_app_data_dir() -> PathBuf {
    APP_DATA_DIR
        .get_or_init(|| {
            let base_dir = dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."));
            base_dir.join("CncOrchestrator")
        })
        .clone()
}

pub fn get_data_dir() -> PathBuf {
    get_app_data_dir().join("data")
}

pub fn get_logs_dir() -> PathBuf {
    get_app_data_dir().join("logs")
}

pub fn get_queues_dir() -> PathBuf {
    get_data_dir().join("queues")
}

pub fn get_settings_json_path() -> PathBuf {
    get_data_dir().join("settings.json")
}

pub fn get_machines_json_path() -> PathBuf {
    get_data_dir().join("machines.json")
}

/// Machine ids come from operators, so keep them inside the queue dir and
/// give distinct ids distinct files. Lowercase letters, digits and `-` are
/// kept; every other byte (`_` and uppercase included) becomes `_XX`, so
/// case-insensitive file systems keep ids apart too.
pub fn queue_snapshot_file_name(machine_id: &str) -> String {
    let mut name = String::with_capacity(machine_id.len() * 3 + 5);
    for byte in machine_id.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("_{:02X}", byte));
        }
    }
    if name.is_empty() {
        name.push('_');
    }
    name.push_str(".json");
    name
}

pub fn initialize_data_directories() -> Result<(), String> {
    let directories = [get_data_dir(), get_logs_dir(), get_queues_dir()];

    for dir in &directories {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| {
                format!("Failed to create directory {:?}: {}", dir, e)
            })?;
            println!("Created directory: {:?}", dir);
        }
    }

    println!("Data directories initialized at: {:?}", get_app_data_dir());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_snapshot_file_name_is_flat() {
        assert_eq!(queue_snapshot_file_name("m-01"), "m-01.json");
        assert_eq!(queue_snapshot_file_name("../etc/x"), "_2E_2E_2Fetc_2Fx.json");
        assert_eq!(queue_snapshot_file_name(""), "_.json");
    }

    #[test]
    fn test_queue_snapshot_file_names_never_collide() {
        let ids = ["M/1", "M_1", "M 1", "M1", "m1", "_4D1", " M1"];
        let names: std::collections::HashSet<String> = ids
            .iter()
            .map(|id| queue_snapshot_file_name(id).to_lowercase())
            .collect();
        assert_eq!(names.len(), ids.len());
    }
}

// Storage key naming

/// Reduces a file name's stem to characters safe in an object key.
pub fn safe_file_stem(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    let stem = match base.rfind('.') {
        Some(dot) if dot > 0 => &base[..dot],
        _ => base,
    };

    let safe: String = stem
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    if safe.is_empty() {
        String::from("program")
    } else {
        safe
    }
}

fn extension(file_name: &str) -> Option<&str> {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    match base.rfind('.') {
        Some(dot) if dot > 0 && dot + 1 < base.len() => Some(&base[dot + 1..]),
        _ => None,
    }
}

/// `<machineId>_<stem>_<8-char id>` plus the original extension.
pub fn make_storage_key(machine_id: &str, file_name: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let short_id = &id[..8];
    let key = format!("{}_{}_{}", safe_file_stem(machine_id), safe_file_stem(file_name), short_id);
    match extension(file_name) {
        Some(ext) => format!("{}.{}", key, ext.to_ascii_lowercase()),
        None => key,
    }
}

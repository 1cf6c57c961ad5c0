//! Cross-platform persistent key/value storage.
//!
//! - Web: `localStorage` (shared by every tab of the dashboard)
//! - Desktop: one file per key in the platform-appropriate config directory:
//!   - Linux: `~/.config/societas/`
//!   - macOS: `~/Library/Application Support/societas/`
//!   - Windows: `%APPDATA%\societas\`
//!
//!   `SOCIETAS_STORAGE_DIR` overrides the directory.

/// Store a string under `key`. Returns `true` if the operation succeeded.
pub fn save(key: &str, value: &str) -> bool {
    save_raw(key, value)
}

/// Read the string stored under `key`.
pub fn load(key: &str) -> Option<String> {
    load_raw(key)
}

/// Remove `key` from storage.
pub fn remove(key: &str) {
    remove_raw(key);
}

// =========================================
// Web (WASM) implementation
// =========================================

#[cfg(target_arch = "wasm32")]
fn local_storage() -> Option<web_sys::Storage> {
    web_sys::window()?.local_storage().ok()?
}

#[cfg(target_arch = "wasm32")]
fn save_raw(key: &str, value: &str) -> bool {
    local_storage()
        .map(|storage| storage.set_item(key, value).is_ok())
        .unwrap_or(false)
}

#[cfg(target_arch = "wasm32")]
fn load_raw(key: &str) -> Option<String> {
    local_storage()?.get_item(key).ok()?
}

#[cfg(target_arch = "wasm32")]
fn remove_raw(key: &str) {
    if let Some(storage) = local_storage() {
        let _ = storage.remove_item(key);
    }
}

// =========================================
// Desktop (native) implementation
// =========================================

/// Storage directory, overridable with `SOCIETAS_STORAGE_DIR`.
#[cfg(not(target_arch = "wasm32"))]
static APP_DIR: once_cell::sync::Lazy<Option<std::path::PathBuf>> =
    once_cell::sync::Lazy::new(|| match std::env::var_os("SOCIETAS_STORAGE_DIR") {
        Some(dir) => Some(dir.into()),
        None => dirs::config_dir().map(|dir| dir.join("societas")),
    });

#[cfg(not(target_arch = "wasm32"))]
fn file_path(key: &str) -> Option<std::path::PathBuf> {
    let app_dir = APP_DIR.as_ref()?;
    if !app_dir.exists() {
        std::fs::create_dir_all(app_dir).ok()?;
    }
    Some(app_dir.join(sanitize_key(key)))
}

/// Turn a storage key into a valid file name.
#[cfg(not(target_arch = "wasm32"))]
fn sanitize_key(key: &str) -> String {
    key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
}

#[cfg(not(target_arch = "wasm32"))]
fn save_raw(key: &str, value: &str) -> bool {
    let Some(path) = file_path(key) else {
        return false;
    };
    std::fs::write(path, value).is_ok()
}

#[cfg(not(target_arch = "wasm32"))]
fn load_raw(key: &str) -> Option<String> {
    let value = std::fs::read_to_string(file_path(key)?).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(not(target_arch = "wasm32"))]
fn remove_raw(key: &str) {
    if let Some(path) = file_path(key) {
        let _ = std::fs::remove_file(path);
    }
}

use std::path::PathBuf;

/// Environment override for the data directory (tests, containers).
pub const DATA_DIR_ENV: &str = "RECEIPT_DATA_DIR";

/// Root data directory for receipt.
///
/// Everything here is device-local (signing keystore, ledger, logs)
/// and must never roam between machines.
///
/// - `RECEIPT_DATA_DIR` if set
/// - Linux: `~/.receipt/`
/// - macOS: `~/Library/Application Support/receipt/`
/// - Windows: `%LOCALAPPDATA%\receipt\`
pub fn receipt_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("receipt");
        }
    }

    #[cfg(windows)]
    {
        if let Some(local) = std::env::var_os("LOCALAPPDATA") {
            return PathBuf::from(local).join("receipt");
        }
    }

    #[cfg(not(any(target_os = "macos", windows)))]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".receipt");
        }
    }

    // Fallback
    PathBuf::from(".receipt")
}

/// Software keystore directory (encrypted signing key, device secret).
pub fn keystore_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("keystore")
}

/// Ledger directory.
pub fn ledger_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("ledger")
}

/// Log directory.
pub fn log_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdirectories_hang_off_the_data_dir() {
        let base = PathBuf::from("/tmp/receipt-paths");
        assert_eq!(keystore_dir(&base), base.join("keystore"));
        assert_eq!(ledger_dir(&base), base.join("ledger"));
        assert_eq!(log_dir(&base), base.join("logs"));
    }
}

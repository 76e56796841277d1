use anyhow::{bail, Context, Result};
use std::path::Path;

/// Generate fresh salt material for username hashing
#[must_use]
pub fn generate_salt() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Load the install salt, creating it on first use
///
/// # Errors
///
/// Returns an error if the salt file cannot be read, written or is empty
pub fn load_or_create_salt(salt_path: &Path) -> Result<String> {
    if salt_path.exists() {
        let salt = std::fs::read_to_string(salt_path)
            .with_context(|| format!("Failed to read salt from {}", salt_path.display()))?;
        let salt = salt.trim().to_string();
        if salt.is_empty() {
            bail!("Salt file {} is empty", salt_path.display());
        }
        return Ok(salt);
    }

    let salt = generate_salt();
    save_salt_to_file(&salt, salt_path)?;
    Ok(salt)
}

/// Save salt to file with restricted permissions
///
/// # Errors
///
/// Returns an error if file cannot be written or permissions cannot be set
pub fn save_salt_to_file(salt: &str, salt_path: &Path) -> Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = salt_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create salt directory")?;
    }

    std::fs::write(salt_path, salt)
        .with_context(|| format!("Failed to write salt to {}", salt_path.display()))?;

    restrict_to_owner(salt_path)?;

    log::info!("Install salt created at {}", salt_path.display());
    Ok(())
}

/// Set restrictive permissions (Unix only)
///
/// # Errors
///
/// Returns an error if the permissions cannot be read or changed
pub(crate) fn restrict_to_owner(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)?.permissions();
        perms.set_mode(0o600); // Read/write for owner only
        std::fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

//! First-time setup: data directory, database, salt

use anyhow::Result;

use super::helpers::Workspace;

/// Initialize codeclaw
///
/// # Errors
///
/// Returns an error if the data directory, database, salt or key cannot be created
pub fn init_command(ws: &Workspace) -> Result<()> {
    println!("Initializing CodeClaw...\n");

    // Step 1: Database setup
    println!("Step 1/3: Database Setup");
    println!("{}", "-".repeat(40));
    let settings = ws.db.get_settings()?;
    println!("Database ready at: {}", ws.paths.database().display());
    println!(
        "Push threshold {}, quarantine above {} findings, automatic push {}",
        settings.push_threshold,
        settings.quarantine_threshold,
        if settings.auto_push { "on" } else { "off" }
    );

    // Step 2: Username-hashing salt
    println!("\nStep 2/3: Install Salt");
    println!("{}", "-".repeat(40));
    let existed = ws.paths.salt().exists();
    ws.salt()?;
    if existed {
        println!("Using existing salt at: {}", ws.paths.salt().display());
    } else {
        println!("Salt generated at: {}", ws.paths.salt().display());
    }
    println!("The salt keys username hashes and never leaves this machine.");

    // Step 3: Artifact encryption key
    println!("\nStep 3/3: Artifact Encryption");
    println!("{}", "-".repeat(40));
    let artifacts = ws.artifacts()?;
    if artifacts.is_encrypting() {
        println!("Exports are encrypted at rest; key at: {}", artifacts.key_path().display());
    } else {
        println!("Exports are stored in plaintext (encrypt_artifacts = false)");
    }

    println!("\n========================================");
    println!("  Setup Complete!");
    println!("========================================");
    println!("\nNext steps:");
    println!("  codeclaw configure --endpoint <url> --repo <owner/name> --api-key <key> --source claude");
    println!("  codeclaw export");

    Ok(())
}

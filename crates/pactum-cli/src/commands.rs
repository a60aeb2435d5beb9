//! One function per subcommand. Each returns the text to print.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use pactum_keys::{KeyManager, PreKeyBundle};
use tracing::info;

pub fn init(manager: &KeyManager) -> Result<String> {
    let local = manager.provision().context("failed to provision identity")?;
    Ok(format!(
        "registration id: {}\nfingerprint:     {}",
        local.registration_id,
        manager.fingerprint(&local.keys.public_key)
    ))
}

pub fn fingerprint(manager: &KeyManager) -> Result<String> {
    let Some(keys) = manager.load_identity()? else {
        bail!("no identity provisioned, run `pactum init` first");
    };
    Ok(manager.fingerprint(&keys.public_key))
}

/// Generate a fresh batch of pre-keys plus a signed pre-key and publish the
/// bundle. The private halves are sealed into the protocol state so that
/// first-contact messages against this bundle can be accepted later.
pub async fn bundle(
    manager: &KeyManager,
    password: &str,
    start_id: u32,
    count: u32,
    signed_id: u32,
) -> Result<String> {
    let local = manager.provision().context("failed to provision identity")?;
    if manager
        .load_protocol_state(password)
        .await
        .context("failed to load protocol state")?
    {
        info!("extending existing protocol state");
    }

    let pre_keys = manager.generate_pre_keys(start_id, count).await?;
    let signed = manager
        .generate_signed_pre_key(&local.keys, signed_id)
        .await?;
    let bundle = PreKeyBundle::assemble(
        &local.keys,
        local.registration_id,
        manager.config().device_id,
        &pre_keys,
        &signed,
    );

    manager.store_pre_key_bundle(&bundle)?;
    manager
        .save_protocol_state(password)
        .await
        .context("failed to save protocol state")?;
    info!(start_id, count, signed_id, "published pre-key bundle");

    Ok(serde_json::to_string_pretty(&bundle.to_stored())?)
}

pub fn export_backup(manager: &KeyManager, password: &str, out: &Path) -> Result<String> {
    let Some(keys) = manager.load_identity()? else {
        bail!("no identity provisioned, nothing to back up");
    };
    let registration_id = manager
        .load_registration_id()?
        .context("registration id missing from store")?;

    let backup = manager.create_key_backup(&keys, registration_id, password)?;
    fs::write(out, backup).with_context(|| format!("failed to write {}", out.display()))?;
    Ok(format!("backup written to {}", out.display()))
}

pub fn import_backup(manager: &KeyManager, password: &str, input: &Path) -> Result<String> {
    let backup = fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let (keys, registration_id) = manager.restore_key_from_backup(&backup, password)?;

    manager.store_identity(&keys)?;
    manager.store_registration_id(registration_id)?;
    Ok(format!(
        "restored identity {}",
        manager.fingerprint(&keys.public_key)
    ))
}

pub fn reset(manager: &KeyManager) -> Result<String> {
    manager.reset_identity()?;
    Ok("local key material removed".to_string())
}

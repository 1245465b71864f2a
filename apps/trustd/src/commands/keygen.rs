// keygen.rs - Create a local Ed25519 signing key for trust tokens.

use std::path::Path;

use anyhow::Context;
use trust_decision::{LocalEd25519Signer, Signer};

pub async fn execute(out: &Path, kid: &str) -> anyhow::Result<()> {
    if out.exists() {
        anyhow::bail!("{} already exists; refusing to overwrite a key", out.display());
    }
    let (signer, pkcs8) = LocalEd25519Signer::generate(kid)?;
    std::fs::write(out, &pkcs8).with_context(|| format!("writing {}", out.display()))?;
    tracing::info!(kid, path = %out.display(), "signing key written");

    let jwk = signer.public_jwk().await?;
    println!("{}", serde_json::to_string_pretty(&jwk)?);
    Ok(())
}

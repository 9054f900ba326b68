use anyhow::{bail, Result};
use std::path::Path;
use tracing::info;

use super::Session;

/// Erase a user's keys, chain and trust lines
pub fn run(config_path: &Path, user: Option<&str>, yes: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let session = Session::open(config_path)?;
        let user = user
            .map(rp_chain::normalize_user_id)
            .unwrap_or_else(|| session.config.node.default_user.clone());

        if !yes {
            bail!(
                "This permanently deletes the keys, chain and trust lines of {}.\nRe-run with --yes to confirm.",
                user
            );
        }

        session.registry.delete_account(&user).await?;
        session.close();

        info!(%user, "Account deleted");
        println!("Deleted all data for {}", user);
        Ok(())
    })
}

use anyhow::{bail, Result};
use std::path::Path;

use super::{settle, Session};

/// Issue `amount` of the user's own asset
pub fn run(config_path: &Path, amount: i64, user: Option<&str>) -> Result<()> {
    if amount <= 0 {
        bail!("Amount must be positive");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let session = Session::open(config_path)?;
        let node = session.node(user).await?;

        let block = settle(&node, node.mint(amount).await).await?;
        let state = node.state();
        session.close();

        println!("Minted {} (block #{})", amount, block.index);
        println!("Hash:         {}", block.hash);
        println!("Balance:      {}", state.balance);
        println!("Total supply: {}", state.total_supply);
        Ok(())
    })
}

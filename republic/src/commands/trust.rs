use anyhow::Result;
use clap::Subcommand;
use std::path::Path;

use super::Session;

#[derive(Debug, Clone, Subcommand)]
pub enum TrustAction {
    /// Accept value from a sender automatically
    Add { sender: String },
    /// Stop trusting a sender
    Remove { sender: String },
    /// Show trust lines
    List,
}

pub fn run(config_path: &Path, action: &TrustAction, user: Option<&str>) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let session = Session::open(config_path)?;
        let node = session.node(user).await?;

        match action {
            TrustAction::Add { sender } => {
                node.add_trust_line(sender).await?;
                println!("{} now trusts {}", node.user_id(), sender);
            }
            TrustAction::Remove { sender } => {
                node.remove_trust_line(sender).await?;
                println!("{} no longer trusts {}", node.user_id(), sender);
            }
            TrustAction::List => {}
        }

        let lines = node.trust_lines();
        session.close();
        if lines.is_empty() {
            println!("Trust lines: none (all senders trusted)");
        } else {
            println!("Trust lines:");
            for line in lines {
                println!("  - {}", line);
            }
        }
        Ok(())
    })
}

use anyhow::{bail, Result};
use rp_gateway::{send_once, Message};
use std::path::Path;
use tracing::{info, warn};

use super::{settle, Session};
use crate::node::SendOutcome;

/// Send an asset to another user.
///
/// Without `asset` (or with the user's own id) this appends a SEND block.
/// For another issuer's asset the signed request goes to the first bootstrap
/// peer that accepts it; the issuer's node applies the transfer.
pub fn run(
    config_path: &Path,
    to: &str,
    amount: i64,
    asset: Option<&str>,
    message: &str,
    user: Option<&str>,
) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let session = Session::open(config_path)?;
        let node = session.node(user).await?;
        let issuer = asset.unwrap_or(node.user_id()).to_string();

        let outcome = match node.send_asset(&issuer, amount, to, message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let block = settle(&node, Err(e)).await?;
                SendOutcome::Local(block)
            }
        };

        match outcome {
            SendOutcome::Local(block) => {
                let balance = node.state().balance;
                session.close();
                println!("Sent {} to {} (block #{})", amount, to, block.index);
                println!("Hash:    {}", block.hash);
                println!("Balance: {}", balance);
            }
            SendOutcome::Remote { issuer, request } => {
                session.close();
                let peers = &session.config.network.bootstrap_peers;
                if peers.is_empty() {
                    bail!("No bootstrap peers configured; cannot reach issuer {}", issuer);
                }

                let message = Message::TransferRequest(request);
                for peer in peers {
                    match send_once(peer, &message, &session.config.network).await {
                        Ok(()) => {
                            info!(%peer, %issuer, "Transfer request delivered");
                            println!("Transfer request for {} {} sent to {} via {}", amount, issuer, to, peer);
                            return Ok(());
                        }
                        Err(e) => warn!(%peer, error = %e, "Peer did not accept transfer request"),
                    }
                }
                bail!("No bootstrap peer accepted the transfer request");
            }
        }
        Ok(())
    })
}

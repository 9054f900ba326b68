use anyhow::Result;
use std::path::Path;

use super::Session;
use crate::oracle::{PriceSource, StaticPrice};

/// Show node info, supply figures, oracle price and portfolio
pub fn run(config_path: &Path, user: Option<&str>, json: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let session = Session::open(config_path)?;
        let node = session.node(user).await?;
        let oracle = StaticPrice::new(session.config.oracle.price);

        let info = node.info().await;
        let portfolio = node.portfolio();
        let price = oracle.price().await;
        session.close();

        if json {
            let report = serde_json::json!({
                "info": info,
                "price": price,
                "portfolio": portfolio.summary(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!();
        println!("=== Republic Node ===");
        println!("User:        {}", info.user_id);
        println!("Public key:  {}", info.public_key);
        println!("Height:      {}", info.height);
        println!("Chain valid: {}", info.valid);
        println!("Balance:     {}", info.state.balance);
        println!(
            "Supply:      minted {}, circulating {}",
            info.inflation.total_minted, info.inflation.circulating_supply
        );
        println!("Transactions: {}", info.state.transaction_count);
        println!("Price:       {:.2} USD/g", price);

        if info.trust_lines.is_empty() {
            println!("Trust lines: none (all senders trusted)");
        } else {
            println!("Trust lines: {}", info.trust_lines.join(", "));
        }

        if portfolio.summary().is_empty() {
            println!("Portfolio:   empty");
        } else {
            println!("Portfolio:");
            for (issuer, amount) in portfolio.summary() {
                println!("  {:<20} {}", issuer, amount);
            }
        }
        if let Some(ledger) = &info.state.ledger {
            println!("Issued to holders:");
            for (holder, amount) in ledger {
                println!("  {:<20} {}", holder, amount);
            }
        }
        println!();
        Ok(())
    })
}

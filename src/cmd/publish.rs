//! One-shot publish command (`gantry publish`).

use anyhow::{Result, bail};

use gantry::config::GatewayConfig;
use gantry::preview::{BranchPublisher, Publication};

pub async fn cmd_publish(config: &GatewayConfig, all: bool) -> Result<()> {
    let publisher = BranchPublisher::new(config.layout(), config.branch_fallback.clone());

    let published = if all {
        publisher.bootstrap(&config.workdir).await?;
        let published = publisher.publish_all_branches(&config.workdir).await;
        if published.is_empty() {
            bail!("No branches were published from {}", config.workdir.display());
        }
        published
    } else {
        vec![publisher.publish_current_branch(&config.workdir).await?]
    };

    for publication in &published {
        print_publication(publication);
    }
    Ok(())
}

fn print_publication(publication: &Publication) {
    println!(
        "{} -> {}  ({})",
        publication.branch,
        publication.target_dir.display(),
        publication.url
    );
}

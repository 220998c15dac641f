//! Print a deck layout from a saved JSON file.
//!
//! The file comes from `labware::serialize::save_to_file`; the path is
//! taken from the command line or the `DECK_FILE` environment variable.

use anyhow::{bail, Context, Result};
use clap::Parser;

use labware::serialize::load_from_file;
use labware::star_deck::StarDeck;
use labware::tree::ResourceTree;

#[derive(Parser)]
#[command(name = "layout-summary", about = "Render a saved deck layout as a table")]
struct Args {
    /// Path to the layout JSON. Falls back to $DECK_FILE.
    layout: Option<String>,

    /// Deck name to attach loaded resources to when the file holds a
    /// bare resource instead of a deck.
    #[arg(long, default_value = "deck")]
    deck_name: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "layout_summary=info".into()),
        )
        .init();

    let args = Args::parse();
    let path = match args.layout.or_else(|| std::env::var("DECK_FILE").ok()) {
        Some(path) => path,
        None => bail!("pass a layout path or set DECK_FILE"),
    };

    let mut tree = ResourceTree::new();
    let root = load_from_file(&mut tree, &path)
        .with_context(|| format!("loading layout from {path}"))?;

    // Rebuild a STARlet deck and move the loaded tree's children onto it
    // so the summary gets rail annotations.
    let mut deck = StarDeck::starlet(args.deck_name);
    let children: Vec<_> = tree.children(root)?.to_vec();
    for child in children {
        // The fresh deck already carries its own trash areas.
        if deck.has_resource(tree.name(child)?) {
            continue;
        }
        let location = tree.location(child)?;
        let value = labware::serialize::serialize_subtree(&tree, child)?;
        let copy = labware::serialize::deserialize_subtree(deck.tree_mut(), &value)?;
        if let Some(location) = location {
            deck.assign_at_location(copy, location, labware::PlacementOptions {
                ignore_collision: true,
                ..Default::default()
            })?;
        }
    }

    println!("{}", deck.summary()?);
    Ok(())
}

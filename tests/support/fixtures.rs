//! rstest fixtures for integration tests
//!
//! ```rust
//! use crate::support::fixtures::*;
//!
//! #[rstest]
//! #[tokio::test]
//! async fn my_test(perl_workspace: TempDir) {
//!     let engine = open_engine(perl_workspace.path()).await;
//! }
//! ```

use super::helpers::write_file;
use anyhow::{bail, Result};
use codebase_context_engine::{
    config::Config,
    embeddings::{hash::HashEmbedder, Embedder},
    indexer::{extract::extractor_for, pipeline::IndexCoordinator},
    storage::vector::SemanticIndexStore,
    Engine,
};
use rstest::*;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

pub const CART_PM: &str = r#"package App::Cart;
use strict;
use warnings;
use List::Util qw(sum);

sub new {
    my ($class, %args) = @_;
    return bless { items => [], %args }, $class;
}

sub total {
    my ($self) = @_;
    return sum(map { $_->{price} } @{ $self->{items} });
}

1;
"#;

pub const UTIL_PM: &str = r#"package App::Util;
use strict;
use Exporter 'import';
our @EXPORT_OK = qw(trim);

sub trim {
    my ($s) = @_;
    $s =~ s/^\s+|\s+$//g;
    return $s;
}

1;
"#;

pub const APP_PL: &str = r#"#!/usr/bin/perl
use strict;
use lib 'lib';
use App::Util qw(trim);
use App::Cart;

sub main {
    my $name = trim($ARGV[0] // '');
    my $cart = App::Cart->new(owner => $name);
    print $cart->total, "\n";
}

main();
"#;

/// A small Perl workspace: two modules, one script, one non-source file.
#[fixture]
pub fn perl_workspace() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "lib/App/Cart.pm", CART_PM);
    write_file(dir.path(), "lib/App/Util.pm", UTIL_PM);
    write_file(dir.path(), "bin/app.pl", APP_PL);
    write_file(dir.path(), "README.md", "# App\n\nsub not_code { 1 }\n");
    dir
}

/// Test configuration for `root`: hash embeddings, small debounce.
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::for_base_dir(root);
    config.hash_embedding_dim = 32;
    config.watch_debounce_ms = 50;
    config
}

pub async fn open_engine(root: &Path) -> Engine {
    Engine::open(test_config(root)).await.unwrap()
}

/// Hash embeddings that refuse any text containing `poison`.
pub struct RefusingEmbedder {
    inner: HashEmbedder,
    poison: &'static str,
}

impl Embedder for RefusingEmbedder {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains(self.poison)) {
            bail!("refusing to embed text containing {}", self.poison);
        }
        self.inner.embed(texts)
    }
}

/// Engine whose embedder fails on any text containing `poison`.
pub async fn open_engine_refusing(root: &Path, poison: &'static str) -> Engine {
    let config = Arc::new(test_config(root));
    let embedder = RefusingEmbedder {
        inner: HashEmbedder::new(config.hash_embedding_dim),
        poison,
    };
    let store = SemanticIndexStore::open(&config.vector_db_path, &config.vector_table, embedder.dim())
        .await
        .unwrap();
    let extractor = extractor_for(config.syntax_strategy, config.whole_file_max_bytes);
    let embedder: Box<dyn Embedder + Send> = Box::new(embedder);
    let coordinator = IndexCoordinator::new(
        config,
        extractor,
        Arc::new(store),
        Arc::new(Mutex::new(embedder)),
    )
    .unwrap();
    Engine::from_coordinator(coordinator).unwrap()
}

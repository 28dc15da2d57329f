use crate::console::Reporter;
use crate::{PackError, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEntry {
    pub alias: String,
    pub entry: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub alias: String,
    pub output: PathBuf,
    pub elapsed_ms: u128,
}

/// Turns one source entry into one compiled output file.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, entry: &BuildEntry) -> Result<PathBuf>;
}

/// Compiles every entry with at most `concurrency` builds in flight. The
/// first failure aborts the whole batch. Results are sorted by alias.
pub async fn compile_all(
    compiler: &dyn Compiler,
    entries: &[BuildEntry],
    concurrency: usize,
    reporter: &dyn Reporter,
) -> Result<Vec<BuildResult>> {
    let limit = concurrency.max(1);
    reporter.verbose(&format!(
        "Compiling {} entries with concurrency {}",
        entries.len(),
        limit
    ));

    let mut results: Vec<BuildResult> = stream::iter(entries)
        .map(|entry| async move {
            let started = Instant::now();
            let output = compiler.compile(entry).await?;
            let elapsed_ms = started.elapsed().as_millis();

            reporter.step(&format!("Compiled {} [{} ms]", entry.alias, elapsed_ms));

            Ok::<_, PackError>(BuildResult {
                alias: entry.alias.clone(),
                output,
                elapsed_ms,
            })
        })
        .buffer_unordered(limit)
        .try_collect()
        .await?;

    results.sort_by(|left, right| left.alias.cmp(&right.alias));
    Ok(results)
}

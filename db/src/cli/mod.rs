use std::error::Error;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use metrisch_types::object::LocalObject;
use metrisch_types::vector::FloatVector;

use crate::algorithm::AlgorithmHost;
use crate::algorithm::seq_scan::{ScanConfig, SequentialScan};
use crate::operation::KnnQuery;

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Answers k-NN queries over a text dataset with a sequential scan
    Scan(ScanArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Text file holding one serialized object per block
    #[arg(long)]
    pub data: PathBuf,
    /// Wire type tag of the stored objects
    #[arg(long, default_value = "FloatVector")]
    pub object_type: String,
    /// Comma-separated components of the query vector
    #[arg(long, value_delimiter = ',', required = true)]
    pub query: Vec<f32>,
    /// Number of nearest neighbours to return
    #[arg(long, default_value_t = 10)]
    pub k: usize,
    /// Query worker threads
    #[arg(long)]
    pub pool_size: Option<usize>,
    /// Objects staged per chunk
    #[arg(long, default_value_t = 1000)]
    pub chunk_size: usize,
    /// Snapshot the loaded algorithm here after answering
    #[arg(long)]
    pub persist: Option<PathBuf>,
}

pub fn run_scan(args: &ScanArgs) -> Result<(), Box<dyn Error>> {
    let mut config = ScanConfig {
        chunk_size: args.chunk_size,
        ..ScanConfig::default()
    };
    if let Some(pool_size) = args.pool_size {
        config.pool_size = pool_size;
    }

    let scan = SequentialScan::from_text_file("seq-scan", config, &args.data, &args.object_type)?;
    let host = AlgorithmHost::new(scan);

    let k = NonZeroUsize::new(args.k).ok_or("k must be positive")?;
    let query: Arc<dyn LocalObject> = Arc::new(FloatVector::new(args.query.clone()));
    let mut knn = KnnQuery::new(query, k);
    host.execute(&mut knn)?;

    for entry in knn.answer().entries() {
        let line = serde_json::json!({
            "locator": entry.object.locator(),
            "distance": entry.distance,
        });
        println!("{line}");
    }

    if let Some(path) = &args.persist {
        host.store_to_file(path)?;
    }
    Ok(())
}

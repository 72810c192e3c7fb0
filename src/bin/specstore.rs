//! Specstore CLI
//!
//! Create, inspect, and edit array files from the command line

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use specstore::{Dataset, DatasetSpec, ElementType, LayoutKind, OpenMode, StoreConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "specstore")]
#[command(about = "Out-of-core storage for N-dimensional spectral arrays")]
struct Args {
    /// TOML file overriding the storage thresholds
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a zero-filled array file
    Create {
        path: PathBuf,

        /// Dimension sizes, dimension 0 first (e.g. 1024,256)
        #[arg(short, long, value_delimiter = ',', required = true)]
        sizes: Vec<usize>,

        #[arg(short, long, value_enum, default_value_t = LayoutArg::Full)]
        layout: LayoutArg,

        /// Store 32-bit integers instead of floats
        #[arg(long)]
        int: bool,

        /// Dimensions holding real/imaginary pairs
        #[arg(long, value_delimiter = ',')]
        complex: Vec<usize>,
    },

    /// Print the header and storage summary
    Info {
        path: PathBuf,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Read one point
    Get {
        path: PathBuf,

        /// Point indices, comma separated (e.g. 3,0,12)
        #[arg(value_delimiter = ',', num_args = 1, required = true)]
        indices: Vec<usize>,
    },

    /// Write one point
    Set {
        path: PathBuf,

        /// Point indices, comma separated (e.g. 3,0,12)
        #[arg(value_delimiter = ',', num_args = 1, required = true)]
        indices: Vec<usize>,

        #[arg(allow_negative_numbers = true)]
        value: f64,
    },

    /// Sum every point
    Sum { path: PathBuf },

    /// Change the array shape, keeping values inside the new bounds
    Resize {
        path: PathBuf,

        #[arg(short, long, value_delimiter = ',', required = true)]
        sizes: Vec<usize>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LayoutArg {
    Full,
    Block,
    Submatrix,
}

impl From<LayoutArg> for LayoutKind {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::Full => LayoutKind::FullMatrix,
            LayoutArg::Block => LayoutKind::BlockMatrix,
            LayoutArg::Submatrix => LayoutKind::Submatrix,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::default(),
    };

    match args.command {
        Command::Create {
            path,
            sizes,
            layout,
            int,
            complex,
        } => {
            let mut spec = DatasetSpec::new(&sizes).layout(layout.into());
            if int {
                spec = spec.element_type(ElementType::Int32);
            }
            for dim in complex {
                if dim >= sizes.len() {
                    bail!("complex dimension {} out of range for {} dimensions", dim, sizes.len());
                }
                spec = spec.complex(dim, true);
            }

            let mut data = Dataset::create(&path, spec, &config)
                .with_context(|| format!("creating {}", path.display()))?;
            info!("Created {:?} with {:?} backend", path, data.backend_kind());
            data.close()?;
        }

        Command::Info { path, json } => {
            let data = Dataset::open(&path, OpenMode::ReadOnly, &config)
                .with_context(|| format!("opening {}", path.display()))?;
            let summary = data.info();
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("path:      {}", path.display());
                println!("backend:   {:?}", summary.backend);
                println!("layout:    {:?}", summary.header.layout_kind);
                println!("element:   {:?} ({:?})", summary.header.element_type, summary.header.byte_order);
                println!("elements:  {}", summary.total_elements);
                println!("data size: {} bytes", summary.data_bytes);
                for (dim, info) in summary.header.dims.iter().enumerate() {
                    println!(
                        "dim {}: {:>8} points  block {:>6}  {}{}",
                        dim,
                        info.size,
                        info.block_size,
                        info.label,
                        if info.complex { "  complex" } else { "" }
                    );
                }
            }
        }

        Command::Get { path, indices } => {
            let data = Dataset::open(&path, OpenMode::ReadOnly, &config)?;
            println!("{}", data.read_point(&indices)?);
        }

        Command::Set {
            path,
            indices,
            value,
        } => {
            let mut data = Dataset::open(&path, OpenMode::ReadWrite, &config)?;
            data.write_point(&indices, value)?;
            data.close()?;
        }

        Command::Sum { path } => {
            let data = Dataset::open(&path, OpenMode::ReadOnly, &config)?;
            println!("{}", data.sum_all()?);
        }

        Command::Resize { path, sizes } => {
            let mut data = Dataset::open(&path, OpenMode::ReadWrite, &config)?;
            let report = data
                .resize(&sizes)
                .with_context(|| format!("resizing {}", path.display()))?;
            info!(
                "Resized to {:?}: {:?} -> {:?}, {} points copied",
                sizes, report.from_kind, report.to_kind, report.copied_points
            );
            data.close()?;
        }
    }

    Ok(())
}

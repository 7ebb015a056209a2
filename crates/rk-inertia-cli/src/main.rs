//! rk-inertia command line entry point

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use rk_inertia::calibrate::{self, Calibration};
use rk_inertia::material::{MaterialClassifier, MaterialMap};
use rk_inertia::urdf;
use rk_inertia::{AssemblyTree, DEFAULT_DENSITY, LinkMap};

/// Per-link mass, centre of mass and inertia from a CAD assembly dump
#[derive(Parser)]
#[command(name = "rk-inertia")]
#[command(version, long_about = None)]
struct Cli {
    /// Assembly geometry dump (`.ron` or JSON)
    assembly: PathBuf,

    /// Density for parts no material rule matches, kg/m³
    #[arg(long, default_value_t = DEFAULT_DENSITY)]
    density: f64,

    /// Material rules (pattern -> density or fixed mass)
    #[arg(long)]
    material_map: Option<PathBuf>,

    /// Link map (link -> parts); without it every top-level part is reported
    #[arg(long)]
    link_map: Option<PathBuf>,

    /// Print URDF <inertial> snippets
    #[arg(long)]
    urdf: bool,

    /// Print the assembly tree and exit
    #[arg(long)]
    tree: bool,

    /// Print top-level parts with solid counts and exit
    #[arg(long)]
    list_parts: bool,

    /// Compute effective densities from datasheet masses and exit
    #[arg(long, value_name = "COMPONENTS")]
    calibrate: Option<PathBuf>,

    /// URDF whose link inertials are replaced
    #[arg(long)]
    urdf_in: Option<PathBuf>,

    /// Where to write the patched URDF (defaults to overwriting --urdf-in)
    #[arg(long, requires = "urdf_in")]
    urdf_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rk_inertia=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let tree = AssemblyTree::load(&cli.assembly)
        .with_context(|| format!("loading assembly {}", cli.assembly.display()))?;

    if cli.tree {
        print!("{}", tree);
        return Ok(());
    }

    if cli.list_parts {
        println!("Top-level parts ({}):", tree.depth1().len());
        for part in tree.depth1() {
            println!("  {:<60} ({} solids)", part.key(), part.solid_count());
        }
        return Ok(());
    }

    if let Some(path) = &cli.calibrate {
        let components = calibrate::load_components(path)?;
        print!("{}", Calibration::run(&tree, &components));
        return Ok(());
    }

    let material_map = match &cli.material_map {
        Some(path) => MaterialMap::load(path)?,
        None => MaterialMap::default(),
    };
    let classifier = MaterialClassifier::new(material_map, cli.density)?;
    tracing::info!(
        "Default density {} kg/m³, {} material rules",
        classifier.default_density(),
        classifier.rules().len()
    );

    let link_map = cli.link_map.as_ref().map(|p| LinkMap::load(p)).transpose()?;
    let report = rk_inertia::analyze(&tree, link_map.as_ref(), &classifier)?;
    print!("{}", report);

    if cli.urdf {
        println!("\n{}", urdf::inertial_snippets(&report));
    }

    if let Some(urdf_in) = &cli.urdf_in {
        let mut robot = urdf::read_robot(urdf_in)?;
        let summary = urdf::patch_robot(&mut robot, &report)?;
        let out = cli.urdf_out.as_ref().unwrap_or(urdf_in);
        urdf::write_robot(&robot, out)?;
        println!(
            "\nPatched {} links in {} ({} skipped)",
            summary.patched.len(),
            out.display(),
            summary.skipped.len()
        );
    }

    Ok(())
}

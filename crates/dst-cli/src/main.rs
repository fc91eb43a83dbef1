use anyhow::Result;
use chrono::NaiveDate;
use dst_core::config::Settings;
use dst_data::FeatureSet;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_help();
        return Ok(());
    }
    match args[1].as_str() {
        "load" => cmd_load(&args[2..]),
        "features" => cmd_features(&args[2..]),
        "run" => cmd_run(&args[2..]),
        "top" => cmd_top(&args[2..]),
        _ => {
            print_help();
            Ok(())
        }
    }
}

fn load_settings(args: &[String]) -> Result<Settings> {
    let mut settings = match parse_flag(args, "--config") {
        Some(path) => Settings::from_yaml(&path)?,
        None => Settings::default(),
    };
    if let Some(input) = parse_flag(args, "--input") {
        settings.data.input_path = input.into();
    }
    if let Some(out) = parse_flag(args, "--out") {
        settings.search.results_path = out.into();
    }
    if let Some(start) = parse_flag(args, "--start") {
        settings.data.date_start = parse_date_flag(&start)?;
    }
    if let Some(end) = parse_flag(args, "--end") {
        settings.data.date_end = parse_date_flag(&end)?;
    }
    if let Some(lags) = parse_flag(args, "--lags") {
        settings.data.n_lags = lags.parse()?;
    }
    if let Some(sims) = parse_flag(args, "--simulations") {
        settings.search.simulations = sims.parse()?;
    }
    Ok(settings)
}

fn prepare(settings: &Settings) -> Result<FeatureSet> {
    let table = dst_data::load_csv(&settings.data.input_path)?;
    dst_data::prepare_feature_set(
        table,
        settings.data.date_start,
        settings.data.date_end,
        &settings.data.fill_columns,
        settings.data.n_lags,
    )
}

fn cmd_load(args: &[String]) -> Result<()> {
    let settings = load_settings(args)?;
    let table = dst_data::load_csv(&settings.data.input_path)?;
    let mut table = dst_data::filter_window(
        &table,
        settings.data.date_start,
        settings.data.date_end,
    );
    dst_data::fill_missing(&mut table, &settings.data.fill_columns);
    println!(
        "Loaded {} rows x {} columns from {} ({} .. {})",
        table.len(),
        table.names.len(),
        settings.data.input_path.display(),
        settings.data.date_start,
        settings.data.date_end
    );
    Ok(())
}

fn cmd_features(args: &[String]) -> Result<()> {
    let settings = load_settings(args)?;
    let features = prepare(&settings)?;
    println!(
        "Features: rows={} cols={} lags={}",
        features.n_rows(),
        features.n_features(),
        settings.data.n_lags
    );
    for name in &features.names {
        println!("  {}", name);
    }
    Ok(())
}

fn cmd_run(args: &[String]) -> Result<()> {
    let verbose = has_flag(args, "--verbose");
    let _guard = dst_core::logging::setup_logging(verbose)?;

    let settings = load_settings(args)?;
    let features = prepare(&settings)?;
    tracing::info!(
        "Prepared feature matrix: rows={} cols={}",
        features.n_rows(),
        features.n_features()
    );

    let config = dst_search::RunConfig::from_settings(&settings);
    let mut results = dst_search::RankedResults::load(&config.results_path)?;
    if !results.is_empty() {
        tracing::info!(
            "Resuming with {} previously ranked equations from '{}'",
            results.len(),
            config.results_path.display()
        );
    }

    let seed = parse_flag(args, "--seed").and_then(|v| v.parse::<u64>().ok());
    let mut engine = match seed {
        Some(s) => dst_search::PopulationSearch::with_seed(s),
        None => dst_search::PopulationSearch::new(),
    };
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    dst_search::run_simulations(&mut engine, &features, &config, &mut rng, &mut results)?;
    println!(
        "Done: {} simulations, {} unique equations in {}",
        config.simulations,
        results.len(),
        config.results_path.display()
    );
    Ok(())
}

fn cmd_top(args: &[String]) -> Result<()> {
    let settings = load_settings(args)?;
    let n: usize = parse_flag(args, "--n")
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    let results = dst_search::RankedResults::load(&settings.search.results_path)?;
    if results.is_empty() {
        println!("No results in {}", settings.search.results_path.display());
        return Ok(());
    }
    println!("Top {} of {} equations by loss:", n.min(results.len()), results.len());
    for row in results.rows().iter().take(n) {
        println!(
            "  loss={:<10.4} complexity={:<3} sim={:<4} {}",
            row.loss, row.complexity, row.simulation, row.equation
        );
    }
    if let Some(json_out) = parse_flag(args, "--json") {
        results.save_top_json(&json_out, n)?;
        println!("Wrote top {} to {}", n.min(results.len()), json_out);
    }
    Ok(())
}

fn parse_date_flag(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("invalid date '{}': {}", raw, e))
}

fn parse_flag(args: &[String], name: &str) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == name {
            return iter.next().cloned();
        }
    }
    None
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|arg| arg == name)
}

fn print_help() {
    println!("dst-cli");
    println!("  load --input Cleaned_NASA_OMNI_Dataset.csv --start 1995-01-01 --end 2021-05-31");
    println!("  features --input data.csv --lags 1");
    println!("  run --input data.csv --out equations_ranked.csv --simulations 100 --seed 42 --verbose");
    println!("  top --out equations_ranked.csv --n 10 --json top.json");
    println!("  (any command also accepts --config config.yaml)");
}

use anyhow::Result;

use fleetscope::config::Config;

use super::runtime;

/// Explain the scope decision for each URL
pub async fn scope_test(
    config: Config,
    urls: Vec<String>,
    extra_seeds: Vec<String>,
    json: bool,
) -> Result<()> {
    let mut seeds = config.job.seeds.clone();
    seeds.extend(extra_seeds);

    let engine = runtime::scope_engine(&config.scope, &seeds)?;
    let reports: Vec<_> = urls.iter().map(|url| engine.test_url(url)).collect();

    if json {
        let output = serde_json::json!({
            "scope": engine.summary(),
            "results": reports,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let summary = engine.summary();
    println!(
        "Scope: {} include, {} exclude, default policy {}",
        summary.include_count, summary.exclude_count, summary.default_policy
    );
    if summary.implicit_includes {
        println!("  (includes derived from seed hosts)");
    }
    println!();
    for report in &reports {
        print!("{report}");
    }
    Ok(())
}

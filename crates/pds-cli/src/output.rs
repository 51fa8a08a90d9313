//! Result output formatting and writing.

use crate::orchestrator::CalibrationResults;
use crate::OutputFormat;
use anyhow::Result;
use std::io::Write;
use std::path::Path;

/// Write calibration results to the output directory.
pub fn write_results(results: &CalibrationResults, output_dir: &Path, format: OutputFormat) -> Result<()> {
    // Write calibration records
    let extension = match format {
        OutputFormat::Text => "txt",
        OutputFormat::Json => "json",
        OutputFormat::Csv => "csv",
    };
    let records_path = output_dir.join(format!("calibration.{}", extension));
    let mut f = std::fs::File::create(&records_path)?;

    match format {
        OutputFormat::Text => {
            writeln!(f, "Calibration Records")?;
            writeln!(f, "===================")?;
            writeln!(
                f,
                "{:>6} {:>4} {:>9} {:>8} {:>6} {:>12} {:>8}",
                "batch", "apa", "endpoint", "channel", "pde", "gain", "snr"
            )?;
            for r in &results.records {
                writeln!(
                    f,
                    "{:>6} {:>4} {:>9} {:>8} {:>6.3} {:>12.3} {:>8.3}",
                    r.batch, r.apa, r.endpoint, r.channel, r.pde, r.gain, r.snr
                )?;
            }
        }
        OutputFormat::Json => {
            writeln!(f, "{}", serde_json::to_string_pretty(&results.records)?)?;
        }
        OutputFormat::Csv => {
            writeln!(f, "batch,apa,endpoint,channel,pde,gain,snr")?;
            for r in &results.records {
                writeln!(
                    f,
                    "{},{},{},{},{},{},{}",
                    r.batch, r.apa, r.endpoint, r.channel, r.pde, r.gain, r.snr
                )?;
            }
        }
    }

    tracing::info!("Wrote calibration records to {:?}", records_path);

    // Write per-peak fit parameters
    let fits_path = output_dir.join("fit_parameters.csv");
    let mut f = std::fs::File::create(&fits_path)?;

    writeln!(
        f,
        "endpoint,channel,row,column,peak,scale,scale_err,mean,mean_err,std,std_err"
    )?;
    for fit in &results.fits {
        let (row, column) = match fit.position {
            Some((r, c)) => (r.to_string(), c.to_string()),
            None => (String::new(), String::new()),
        };
        let p = &fit.params;
        for k in 0..p.len() {
            writeln!(
                f,
                "{},{},{},{},{},{},{},{},{},{},{}",
                fit.channel.endpoint,
                fit.channel.channel,
                row,
                column,
                k,
                p.scale[k].0,
                p.scale[k].1,
                p.mean[k].0,
                p.mean[k].1,
                p.std[k].0,
                p.std[k].1
            )?;
        }
    }

    tracing::info!("Wrote fit parameters to {:?}", fits_path);

    // Write summary
    let summary_path = output_dir.join("summary.txt");
    let mut f = std::fs::File::create(&summary_path)?;

    writeln!(f, "PDS Calibration Summary: {}", results.name)?;
    writeln!(f, "==============================")?;
    writeln!(f)?;
    writeln!(f, "Waveforms:        {}", results.waveforms)?;
    writeln!(f, "Channels:         {}", results.channels)?;
    writeln!(f, "Gain records:     {}", results.records.len())?;

    let fitted = results.fits.iter().filter(|fit| fit.params.len() >= 2).count();
    writeln!(f, "Channels with >=2 fitted peaks: {}", fitted)?;

    if let Some((mean, spread)) = gain_spread(results) {
        writeln!(f, "Mean gain:        {:.3} (std {:.3})", mean, spread)?;
    }

    writeln!(f)?;
    if results.all_fitted {
        writeln!(f, "Status: PASS - every channel fitted")?;
    } else {
        writeln!(f, "Status: PARTIAL - some channels were not fitted")?;
    }

    tracing::info!("Wrote summary to {:?}", summary_path);

    Ok(())
}

/// Mean and standard deviation of the exported gains.
fn gain_spread(results: &CalibrationResults) -> Option<(f64, f64)> {
    if results.records.is_empty() {
        return None;
    }
    let n = results.records.len() as f64;
    let mean = results.records.iter().map(|r| r.gain).sum::<f64>() / n;
    let var = results.records.iter().map(|r| (r.gain - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}

/// Print results to stdout.
pub fn print_results(results: &CalibrationResults) {
    println!("\n=== Calibration Results: {} ===\n", results.name);
    println!("Waveforms: {}", results.waveforms);
    println!("Channels:  {}", results.channels);

    if !results.records.is_empty() {
        println!("\nGain / SNR:");
        for r in &results.records {
            println!("  {}-{}: gain {:.2}, SNR {:.2}", r.endpoint, r.channel, r.gain, r.snr);
        }
    }

    if results.all_fitted {
        println!("\n  Status: PASS");
    } else {
        println!("\n  Status: PARTIAL");
    }

    println!();
}

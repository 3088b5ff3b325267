use crate::config::default_config_paths;
use crate::config::generate::generate_starter_config;
use dialoguer::Confirm;
use std::fs;
use std::path::PathBuf;

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // First default location: ~/.config/logbatch/config.yml, else /etc/logbatch
    let config_path = default_config_paths()
        .into_iter()
        .next()
        .ok_or("could not determine a config location")?;

    if config_path.exists() {
        let overwrite = Confirm::new()
            .with_prompt(format!(
                "Config file already exists at {}. Overwrite?",
                config_path.display()
            ))
            .default(false)
            .interact()?;

        if !overwrite {
            eprintln!("Left {} unchanged", config_path.display());
            return Ok(());
        }
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&config_path, config_content)?;

    println!("Config file written to {}", config_path.display());
    Ok(())
}

pub fn validate(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("No config file found. Use --config to specify a path.")?;

    println!("Validating config file: {}", path.display());

    match crate::config::load_config(&path) {
        Ok(config) => {
            println!("✓ Config is valid");
            println!(
                "  job {} every {:?}, chunk size {}, skip limit {}",
                config.job.name, config.schedule.every, config.job.chunk_size, config.job.skip_limit
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Config validation failed:\n{}", e);
            std::process::exit(1);
        }
    }
}

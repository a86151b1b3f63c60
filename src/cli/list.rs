use anyhow::Result;
use tracing::warn;

use crate::config::{Config, AVAILABLE_MODELS};
use crate::pipeline::inputs;

/// Print the available cases, persona sets and models, marking defaults.
pub fn run(config_path: Option<String>) -> Result<()> {
    let config = Config::load_with_path(config_path)?;
    print!("{}", render(&config));
    Ok(())
}

fn render(config: &Config) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "NetLogo cases ({}):\n",
        config.paths.netlogo_dir.display()
    ));
    match inputs::list_cases(&config.paths.netlogo_dir) {
        Ok(cases) if !cases.is_empty() => {
            for (i, case) in cases.iter().enumerate() {
                let marker = if i == 0 { " (default)" } else { "" };
                out.push_str(&format!("  {}. {}{}\n", i + 1, case, marker));
            }
        }
        Ok(_) => out.push_str("  (none)\n"),
        Err(e) => {
            warn!("Could not list cases: {}", e);
            out.push_str("  (unreadable)\n");
        }
    }

    out.push_str(&format!(
        "\nPersona sets ({}):\n",
        config.paths.persona_dir.display()
    ));
    match inputs::list_persona_sets(&config.paths.persona_dir) {
        Ok(sets) if !sets.is_empty() => {
            for (i, set) in sets.iter().enumerate() {
                let marker = if *set == config.run.persona_set {
                    " (default)"
                } else {
                    ""
                };
                out.push_str(&format!("  {}. {}{}\n", i + 1, set, marker));
            }
        }
        Ok(_) => out.push_str("  (none)\n"),
        Err(e) => {
            warn!("Could not list persona sets: {}", e);
            out.push_str("  (unreadable)\n");
        }
    }

    out.push_str("\nModels:\n");
    for (i, model) in AVAILABLE_MODELS.iter().enumerate() {
        let marker = if *model == config.llm.model {
            " (default)"
        } else {
            ""
        };
        out.push_str(&format!("  {}. {}{}\n", i + 1, model, marker));
    }

    out
}

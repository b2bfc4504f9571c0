use anyhow::Result;
use clap::{Parser, ValueEnum};

use super::App;

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Theme {
    Dark,
    Light,
}

#[derive(Parser)]
pub struct ThemeArgs {
    /// New theme; prints the current one when omitted
    pub theme: Option<Theme>,
}

pub fn theme_command(app: &mut App, args: ThemeArgs) -> Result<()> {
    if let Some(theme) = args.theme {
        let is_dark = theme == Theme::Dark;
        if app.config.is_dark != is_dark {
            app.config.is_dark = is_dark;
            app.save()?;
        }
    }
    println!("{}", if app.config.is_dark { "dark" } else { "light" });
    Ok(())
}

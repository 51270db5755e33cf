use console::{Emoji, style};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

/// SQL block followed by the answer, as printed by `ask` and `chat`.
pub fn print_reply(sql: &str, answer: &str, is_error: bool) {
    if !sql.is_empty() {
        println!("{}", style("SQL").bold().dim());
        for line in sql.lines() {
            println!("  {}", style(line).cyan());
        }
        println!();
    }
    if is_error {
        print_warn(answer);
    } else {
        println!("{} {}", SPARKLE, style(answer).bold());
    }
}

pub fn print_banner() {
    println!();
    println!(
        "{}",
        style("sensorsql: ask your sensor data in plain English")
            .bold()
            .cyan()
    );
    println!();
}

pub fn print_goodbye() {
    println!("\n{} {}", SPARKLE, style("Bye!").bold().cyan());
}

/// A titled block of `command  description` lines in the help screen.
pub struct GuideSection {
    title: String,
    commands: Vec<(String, String)>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            commands: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.commands
            .push((name.to_string(), description.to_string()));
        self
    }

    pub fn print(&self) {
        println!(" {}", style(&self.title).bold().underlined());
        let width = self.commands.iter().map(|(n, _)| n.len()).max().unwrap_or(0);
        for (name, description) in &self.commands {
            println!(
                "   {}  {}",
                style(format!("{:<width$}", name, width = width)).green(),
                description
            );
        }
        println!();
    }
}

//! Terminal styling utilities

pub fn style_cyan(s: &str) -> String {
    format!("\x1b[36m{}\x1b[0m", s)
}

pub fn style_green(s: &str) -> String {
    format!("\x1b[32m{}\x1b[0m", s)
}

pub fn style_red(s: &str) -> String {
    format!("\x1b[31m{}\x1b[0m", s)
}

pub fn style_yellow(s: &str) -> String {
    format!("\x1b[33m{}\x1b[0m", s)
}

pub fn style_dim(s: &str) -> String {
    format!("\x1b[2m{}\x1b[0m", s)
}

pub fn style_bold(s: &str) -> String {
    format!("\x1b[1m{}\x1b[0m", s)
}

pub fn print_success(msg: &str) {
    println!("{} {}", style_green("✓"), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", style_red("✗"), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", style_yellow("⚠"), msg);
}

pub fn print_header(title: &str) {
    println!();
    println!("{}", style_bold(title));
    println!("{}", "─".repeat(title.chars().count()));
}

/// Aligned `label: value` row
pub fn print_row(label: &str, value: &str) {
    println!("{:<18}{}", format!("{}:", label), value);
}

/// Token amounts are shown with six decimals
pub fn format_tokens(amount: f64) -> String {
    format!("{:.6}", amount)
}

/// Multipliers are shown as `×1.234`
pub fn format_factor(factor: f64) -> String {
    format!("×{:.4}", factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatting() {
        assert_eq!(format_tokens(0.1212), "0.121200");
        assert_eq!(format_factor(2.0), "×2.0000");
        assert!(style_bold("x").contains('x'));
    }
}

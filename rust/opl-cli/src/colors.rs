//! ANSI color helpers for CLI output.
//!
//! Colors are dropped when `NO_COLOR` is set.

fn paint(code: &str, s: &str) -> String {
    if std::env::var_os("NO_COLOR").is_some() {
        s.to_string()
    } else {
        format!("\x1b[{}m{}\x1b[0m", code, s)
    }
}

pub fn green(s: &str) -> String {
    paint("32", s)
}

pub fn red(s: &str) -> String {
    paint("31", s)
}

pub fn yellow(s: &str) -> String {
    paint("33", s)
}

pub fn bold(s: &str) -> String {
    paint("1", s)
}

pub fn gray(s: &str) -> String {
    paint("90", s)
}

/// Right-aligned bold green verb, e.g. `   Compiled`.
pub fn status_label(label: &str) -> String {
    paint("1;32", &format!("{:>12}", label))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_right_aligned() {
        assert!(status_label("Ran").contains("         Ran"));
    }

    #[test]
    fn text_survives_painting() {
        assert!(red("error:").contains("error:"));
        assert!(bold("x").ends_with("x\x1b[0m") || bold("x") == "x");
    }
}

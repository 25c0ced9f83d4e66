//! Terminal style roles for the binary's own output
//!
//! Each logical role maps to an optional `colored::Color`. Painting only
//! happens when the caller says color is enabled, so there is no global
//! color state.
//!
//! ```
//! use workline::core::styles::StyleRole;
//! assert_eq!(StyleRole::Header.paint("Name", false), "Name");
//! assert!(StyleRole::Header.paint("Name", true).starts_with("\x1b[33m"));
//! ```

use clap::builder::styling::AnsiColor;
use colored::Color;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StyleRole {
    Header,
    Name,
    Literal,
    Placeholder,
    Error,
    Dim,
    Value,
}

impl StyleRole {
    pub fn color(self) -> Option<Color> {
        match self {
            StyleRole::Header => Some(Color::Yellow),
            StyleRole::Name => Some(Color::BrightGreen),
            StyleRole::Literal => Some(Color::Cyan),
            StyleRole::Placeholder => Some(Color::Green),
            StyleRole::Error => Some(Color::BrightRed),
            StyleRole::Dim => Some(Color::BrightBlack),
            StyleRole::Value => None,
        }
    }

    pub fn paint(self, text: &str, enabled: bool) -> String {
        match self.color().and_then(ansi_code) {
            Some(code) if enabled => format!("\x1b[{}m{}\x1b[0m", code, text),
            _ => text.to_string(),
        }
    }

    /// Foreground style spec understood by prettytable cells
    pub fn table_spec(self) -> Option<&'static str> {
        Some(match self.color()? {
            Color::Yellow => "Fy",
            Color::BrightGreen => "FG",
            Color::Cyan => "Fc",
            Color::Green => "Fg",
            Color::BrightRed => "FR",
            Color::BrightBlack => "FK",
            _ => return None,
        })
    }
}

fn ansi_code(color: Color) -> Option<&'static str> {
    Some(match color {
        Color::Yellow => "33",
        Color::BrightGreen => "92",
        Color::Cyan => "36",
        Color::Green => "32",
        Color::BrightRed => "91",
        Color::BrightBlack => "90",
        _ => return None,
    })
}

fn clap_color(color: Color) -> Option<AnsiColor> {
    Some(match color {
        Color::Yellow => AnsiColor::Yellow,
        Color::BrightGreen => AnsiColor::BrightGreen,
        Color::Cyan => AnsiColor::Cyan,
        Color::Green => AnsiColor::Green,
        Color::BrightRed => AnsiColor::BrightRed,
        Color::BrightBlack => AnsiColor::BrightBlack,
        _ => return None,
    })
}

/// clap help styles built from the same roles
pub fn palette_to_clap(enabled: bool) -> clap::builder::Styles {
    use clap::builder::styling::{Color as ClapColor, Style};
    if !enabled {
        return clap::builder::Styles::plain();
    }

    let style = |role: StyleRole, bold: bool| {
        let mut s = Style::new();
        if let Some(col) = role.color().and_then(clap_color) {
            s = s.fg_color(Some(ClapColor::Ansi(col)));
        }
        if bold {
            s = s.bold();
        }
        s
    };

    clap::builder::Styles::styled()
        .header(style(StyleRole::Header, true))
        .usage(style(StyleRole::Header, true))
        .literal(style(StyleRole::Literal, false))
        .placeholder(style(StyleRole::Placeholder, false))
        .error(style(StyleRole::Error, true))
}

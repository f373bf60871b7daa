//! Builder for the markdown documents returned to clients.

/// Fluent builder for a markdown document with an `#` title.
///
/// # Example
///
/// ```ignore
/// let text = MarkdownBuilder::new("Database Schemas")
///     .line("Found 2 schema(s):")
///     .blank()
///     .bullet("public")
///     .bullet("audit")
///     .build();
/// ```
pub struct MarkdownBuilder {
    lines: Vec<String>,
}

impl MarkdownBuilder {
    /// Start a document with a title line followed by a blank line.
    pub fn new(title: impl AsRef<str>) -> Self {
        Self {
            lines: vec![format!("# {}", title.as_ref()), String::new()],
        }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(String::new());
        self
    }

    pub fn bullet(mut self, item: impl AsRef<str>) -> Self {
        self.lines.push(format!("- {}", item.as_ref()));
        self
    }

    /// `**label:** value`
    pub fn field(mut self, label: &str, value: impl AsRef<str>) -> Self {
        self.lines.push(format!("**{}:** {}", label, value.as_ref()));
        self
    }

    /// Fenced code block.
    pub fn code(mut self, language: &str, body: impl Into<String>) -> Self {
        self.lines.push(format!("```{}", language));
        self.lines.push(body.into());
        self.lines.push("```".to_string());
        self
    }

    /// Header row, separator row and one row per entry.
    ///
    /// With `rule` set, the separator repeats `-` to each header's width;
    /// otherwise every separator cell is `---`.
    pub fn table<I, R>(mut self, headers: &[&str], rule: bool, rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = String>,
    {
        self.lines.push(format!("| {} |", headers.join(" | ")));

        let separator = if rule {
            let dashes: Vec<String> = headers.iter().map(|h| "-".repeat(h.len() + 2)).collect();
            format!("|{}|", dashes.join("|"))
        } else {
            let dashes: Vec<&str> = headers.iter().map(|_| "---").collect();
            format!("| {} |", dashes.join(" | "))
        };
        self.lines.push(separator);

        for row in rows {
            let cells: Vec<String> = row.into_iter().collect();
            self.lines.push(format!("| {} |", cells.join(" | ")));
        }
        self
    }

    pub fn build(self) -> String {
        self.lines.join("\n")
    }
}

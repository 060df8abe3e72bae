/// A heading-delimited slice of raw Markdown.
#[derive(Debug, Clone)]
pub struct DocSection {
    pub title: String,
    pub level: usize,
    pub content: String,
}

/// Parse raw markdown into a flat list of sections. Content before the first
/// heading lands in an implicit "Introduction" section; the heading line
/// itself stays inside the section content.
pub fn split_markdown(content: &str) -> Vec<DocSection> {
    let mut sections = Vec::new();
    let mut current_title = "Introduction".to_string();
    let mut current_level = 0usize;
    let mut buffer = String::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some((level, title)) = heading_of(trimmed) {
            if !buffer.trim().is_empty() {
                sections.push(DocSection {
                    title: current_title.clone(),
                    level: current_level,
                    content: buffer.clone(),
                });
            }
            current_title = title;
            current_level = level;
            buffer.clear();
            buffer.push_str(line);
            buffer.push('\n');
            continue;
        }
        buffer.push_str(line);
        buffer.push('\n');
    }

    if !buffer.trim().is_empty() {
        sections.push(DocSection {
            title: current_title,
            level: current_level,
            content: buffer,
        });
    }

    sections
}

fn heading_of(line: &str) -> Option<(usize, String)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(' ') {
        return None;
    }
    let title = rest.trim().to_string();
    if title.is_empty() {
        return None;
    }
    Some((level, title))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_headings_keeping_heading_lines() {
        let md = "# Overview\n\nhello\n\n## Details\n\nmore\n";
        let sections = split_markdown(md);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "Overview");
        assert_eq!(sections[0].level, 1);
        assert!(sections[0].content.starts_with("# Overview"));
        assert_eq!(sections[1].title, "Details");
        assert_eq!(sections[1].level, 2);
    }

    #[test]
    fn preamble_becomes_introduction() {
        let md = "some prose first\n\n# Real Section\n\nbody\n";
        let sections = split_markdown(md);
        assert_eq!(sections[0].title, "Introduction");
        assert_eq!(sections[0].level, 0);
        assert!(sections[0].content.contains("some prose first"));
    }

    #[test]
    fn hash_without_space_is_not_a_heading() {
        let md = "#hashtag\nbody\n";
        let sections = split_markdown(md);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Introduction");
    }

    #[test]
    fn empty_input_yields_no_sections() {
        assert!(split_markdown("").is_empty());
        assert!(split_markdown("\n\n").is_empty());
    }
}

use scraper::{ElementRef, Html, Selector};

/// Regions that never carry page content
const BOILERPLATE: &str = "script, style, nav, footer, header";

/// Strip boilerplate regions from a page and narrow it to its main content.
///
/// The first `<main>` element wins; otherwise the first `<div>` with a class
/// containing `content` or `main`; otherwise the whole cleaned document.
pub fn extract_content(raw_html: &str) -> String {
    let mut document = Html::parse_document(raw_html);

    if let Ok(boilerplate) = Selector::parse(BOILERPLATE) {
        let ids: Vec<_> = document.select(&boilerplate).map(|element| element.id()).collect();
        for id in ids {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }
    }

    if let Some(main) = first_match(&document, "main") {
        return main.html();
    }

    if let Ok(divs) = Selector::parse("div") {
        let container = document.select(&divs).find(|div| {
            div.value()
                .classes()
                .any(|class| class.contains("content") || class.contains("main"))
        });
        if let Some(container) = container {
            return container.html();
        }
    }

    document.html()
}

fn first_match<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_main_landmark() {
        let html = r#"<html><head><style>p{}</style></head><body>
            <header>Site header</header>
            <nav><a href="/x">Menu</a></nav>
            <div class="content">Sidebar content</div>
            <main><h1>Admissions</h1><script>track()</script><p>Deadline: June 1</p></main>
            <footer>Copyright</footer>
        </body></html>"#;

        let content = extract_content(html);
        assert!(content.starts_with("<main>"));
        assert!(content.contains("Deadline: June 1"));
        assert!(!content.contains("track()"));
        assert!(!content.contains("Sidebar content"));
    }

    #[test]
    fn test_falls_back_to_content_container() {
        let html = r#"<html><body>
            <div class="wrapper"><div class="page-content inner">Fees: 1000</div></div>
            <footer>Footer text</footer>
        </body></html>"#;

        let content = extract_content(html);
        assert!(content.contains("page-content"));
        assert!(content.contains("Fees: 1000"));
        assert!(!content.contains("wrapper"));
    }

    #[test]
    fn test_returns_cleaned_document_without_landmarks() {
        let html = r#"<html><head><script>var x = 1;</script></head><body>
            <header>Top</header><p>Scholarships available</p><nav>Links</nav>
        </body></html>"#;

        let content = extract_content(html);
        assert!(content.contains("Scholarships available"));
        assert!(!content.contains("var x"));
        assert!(!content.contains("Top"));
        assert!(!content.contains("Links"));
    }

    #[test]
    fn test_nested_boilerplate_removed() {
        let html = "<main><header><nav>Inner nav</nav></header><p>Body</p></main>";
        let content = extract_content(html);
        assert_eq!(content, "<main><p>Body</p></main>");
    }
}

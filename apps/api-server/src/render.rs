//! HTML pages served on the resolve path.

/// Delay before the interstitial gives up on the app and loads the web link.
pub const WEB_FALLBACK_DELAY_MS: u32 = 1500;

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// JavaScript literal for `value`, safe to embed inside a `<script>` element.
fn js_value(value: Option<&str>) -> String {
    serde_json::to_string(&value)
        .unwrap_or_else(|_| "null".into())
        .replace("</", "<\\/")
}

const STYLE: &str = r#"
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #f1f5f9;
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            padding: 20px;
        }
        .card {
            background: white;
            border-radius: 16px;
            box-shadow: 0 25px 50px -12px rgba(0,0,0,0.25);
            max-width: 420px;
            width: 100%;
            padding: 32px 24px;
            text-align: center;
        }
        h1 { font-size: 1.25rem; color: #334155; margin-bottom: 12px; }
        p { color: #64748b; margin-bottom: 24px; }
        .bridge { margin-bottom: 24px; }
        .actions { display: flex; flex-direction: column; gap: 12px; }
        .btn {
            padding: 14px 24px;
            text-decoration: none;
            border-radius: 8px;
            font-weight: 600;
            font-size: 1rem;
        }
        .btn-primary { background: #6366f1; color: white; }
        .btn-secondary { background: #e2e8f0; color: #475569; }
"#;

/// Parameters of the app-handoff page.
pub struct Interstitial<'a> {
    pub app_link: Option<&'a str>,
    pub web_link: &'a str,
    pub app_only: bool,
    pub auto_call_app: bool,
    /// Registrant-authored HTML shown on app-only links.
    pub bridge_template: Option<&'a str>,
}

/// Page that tries the app link and falls back to the web link after
/// [`WEB_FALLBACK_DELAY_MS`] unless the link is app-only. The fallback timer
/// starts on load even when the app is not opened automatically. Leaving the
/// page (the app took over) cancels it.
pub fn render_interstitial(page: &Interstitial<'_>) -> String {
    let bridge_html = page
        .bridge_template
        .map(|t| format!(r#"<div class="bridge">{t}</div>"#))
        .unwrap_or_default();
    let app_button = page
        .app_link
        .map(|l| {
            format!(
                r#"<a class="btn btn-primary" id="open-app" href="{}">Open in app</a>"#,
                html_escape(l)
            )
        })
        .unwrap_or_default();
    let title = if page.app_only {
        "This link opens in the app"
    } else {
        "Opening the app..."
    };

    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <meta name="robots" content="noindex">
    <title>{title}</title>
    <style>{style}</style>
</head>
<body>
    <div class="card">
        <h1>{title}</h1>
        {bridge_html}
        <div class="actions">
            {app_button}
            <a class="btn btn-secondary" id="open-web" href="{web_href}">Continue on the web</a>
        </div>
    </div>
    <script>
        (function () {{
            var appLink = {app_js};
            var webLink = {web_js};
            var appOnly = {app_only};
            var timer = null;

            function fallback() {{
                if (appOnly) return;
                if (timer) clearTimeout(timer);
                timer = setTimeout(function () {{ window.location.replace(webLink); }}, {delay});
            }}
            function openApp() {{
                if (!appLink) {{ fallback(); return; }}
                window.location.href = appLink;
                fallback();
            }}
            document.addEventListener('visibilitychange', function () {{
                if (document.hidden && timer) {{ clearTimeout(timer); timer = null; }}
            }});
            var button = document.getElementById('open-app');
            if (button) button.addEventListener('click', function (e) {{ e.preventDefault(); openApp(); }});
            if ({auto_call} || !appLink) openApp();
            else fallback();
        }})();
    </script>
</body>
</html>"##,
        title = title,
        style = STYLE,
        bridge_html = bridge_html,
        app_button = app_button,
        web_href = html_escape(page.web_link),
        app_js = js_value(page.app_link),
        web_js = js_value(Some(page.web_link)),
        app_only = page.app_only,
        auto_call = page.auto_call_app,
        delay = WEB_FALLBACK_DELAY_MS,
    )
}

/// "Invalid link" page with a way out to the fallback URL.
pub fn render_not_found(fallback_url: &str) -> String {
    format!(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <meta name="robots" content="noindex">
    <title>Link not found</title>
    <style>{style}</style>
</head>
<body>
    <div class="card">
        <h1>This link is invalid or has expired</h1>
        <p>Check the address, or continue to the home page.</p>
        <div class="actions">
            <a class="btn btn-primary" href="{href}">Go to home page</a>
        </div>
    </div>
</body>
</html>"##,
        style = STYLE,
        href = html_escape(fallback_url),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page<'a>(app_link: Option<&'a str>, app_only: bool, auto: bool) -> Interstitial<'a> {
        Interstitial {
            app_link,
            web_link: "https://acme.com/item?a=1&b=2",
            app_only,
            auto_call_app: auto,
            bridge_template: None,
        }
    }

    #[test]
    fn escapes_html() {
        assert_eq!(
            html_escape(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn js_values_cannot_close_the_script() {
        assert_eq!(js_value(None), "null");
        assert_eq!(js_value(Some("a</script>b")), r#""a<\/script>b""#);
    }

    #[test]
    fn interstitial_embeds_links_and_flags() {
        let html = render_interstitial(&page(Some("acme://item/1"), false, true));
        assert!(html.contains(r#"href="acme://item/1""#));
        assert!(html.contains(r#"href="https://acme.com/item?a=1&amp;b=2""#));
        assert!(html.contains(r#"var appLink = "acme://item/1";"#));
        assert!(html.contains("var appOnly = false;"));
        assert!(html.contains("if (true || !appLink) openApp();"));
        assert!(html.contains(&WEB_FALLBACK_DELAY_MS.to_string()));
    }

    #[test]
    fn manual_app_open_still_falls_back_to_web() {
        let html = render_interstitial(&page(Some("acme://item/1"), false, false));
        assert!(html.contains("if (false || !appLink) openApp();\n            else fallback();"));
        assert!(html.contains("var appOnly = false;"));
        assert!(html.contains("if (appOnly) return;"));
    }

    #[test]
    fn interstitial_without_app_link_has_no_app_button() {
        let html = render_interstitial(&page(None, false, false));
        assert!(!html.contains("open-app\" href"));
        assert!(html.contains("var appLink = null;"));
    }

    #[test]
    fn app_only_shows_bridge_template() {
        let mut p = page(Some("acme://x"), true, false);
        p.bridge_template = Some("<p>Install Acme</p>");
        let html = render_interstitial(&p);
        assert!(html.contains(r#"<div class="bridge"><p>Install Acme</p></div>"#));
        assert!(html.contains("var appOnly = true;"));
        assert!(html.contains("This link opens in the app"));
    }

    #[test]
    fn not_found_links_to_fallback() {
        let html = render_not_found("https://acme.com/?from=\"x\"");
        assert!(html.contains(r#"href="https://acme.com/?from=&quot;x&quot;""#));
        assert!(html.contains("invalid or has expired"));
    }
}

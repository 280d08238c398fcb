//! Template Renderer - Personalizes campaign content and wires in tracking

use crate::tracking::TrackingCodec;
use gazette_storage::models::{Campaign, QueueJob};
use regex::{Captures, Regex};
use std::sync::{Arc, LazyLock};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*[A-Za-z0-9_.]+\s*\}\}").unwrap());

/// Anchor `href` attribute, double- or single-quoted
static ANCHOR_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(<a\b[^>]*?\bhref\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

static BODY_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</body\s*>").unwrap());

/// Per-recipient message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
    pub unsubscribe_url: String,
    /// `List-Unsubscribe` header value
    pub list_unsubscribe: String,
}

/// Template renderer for personalizing email content
#[derive(Clone)]
pub struct TemplateRenderer {
    codec: Arc<TrackingCodec>,
}

impl TemplateRenderer {
    pub fn new(codec: Arc<TrackingCodec>) -> Self {
        Self { codec }
    }

    /// Render a campaign for the recipient of a queue job
    pub fn render(&self, campaign: &Campaign, job: &QueueJob) -> RenderedMessage {
        let unsubscribe_url = self.codec.unsubscribe_url(campaign.id, job.subscriber_id);
        let name = job.name.as_deref();

        let subject = personalize(&campaign.subject, &job.email, name, &unsubscribe_url);

        let html_name = name.map(escape_html);
        let html = personalize(
            &campaign.html_body,
            &escape_html(&job.email),
            html_name.as_deref(),
            &escape_attr(&unsubscribe_url),
        );
        let html = self.rewrite_links(&html, campaign, job, &unsubscribe_url);
        let pixel = self.codec.pixel_url(campaign.id, job.subscriber_id);
        let html_body = inject_pixel(&html, &pixel);

        let text_body = campaign
            .text_body
            .as_deref()
            .map(|text| personalize(text, &job.email, name, &unsubscribe_url));

        RenderedMessage {
            subject,
            html_body,
            text_body,
            list_unsubscribe: format!("<{}>", unsubscribe_url),
            unsubscribe_url,
        }
    }

    /// Point every absolute http(s) anchor at the click redirect
    fn rewrite_links(
        &self,
        html: &str,
        campaign: &Campaign,
        job: &QueueJob,
        unsubscribe_url: &str,
    ) -> String {
        ANCHOR_HREF
            .replace_all(html, |caps: &Captures| {
                let prefix = &caps[1];
                let raw = caps
                    .get(2)
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                let href = raw.trim().replace("&amp;", "&");

                let lower = href.to_ascii_lowercase();
                let trackable = (lower.starts_with("http://") || lower.starts_with("https://"))
                    && href != unsubscribe_url;
                if !trackable {
                    return caps[0].to_string();
                }

                let tracked = self.codec.click_url(campaign.id, job.subscriber_id, &href);
                format!("{}\"{}\"", prefix, escape_attr(&tracked))
            })
            .into_owned()
    }
}

/// Substitute recipient placeholders; unknown placeholders are dropped
fn personalize(template: &str, email: &str, name: Option<&str>, unsubscribe_url: &str) -> String {
    let name = name.unwrap_or("");
    let mut parts = name.split_whitespace();
    let first_name = parts.next().unwrap_or("");
    let last_name = parts.collect::<Vec<_>>().join(" ");

    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let key = caps[0]
                .trim_start_matches("{{")
                .trim_end_matches("}}")
                .trim()
                .to_string();
            match key.as_str() {
                "email" => email.to_string(),
                "name" => name.to_string(),
                "first_name" => first_name.to_string(),
                "last_name" => last_name.clone(),
                "unsubscribe_url" => unsubscribe_url.to_string(),
                _ => String::new(),
            }
        })
        .into_owned()
}

/// Insert the open pixel right before `</body>`, or append it
fn inject_pixel(html: &str, pixel_url: &str) -> String {
    let img = format!(
        r#"<img src="{}" width="1" height="1" alt="" style="display:none;border:0" />"#,
        escape_attr(pixel_url)
    );

    match BODY_CLOSE.find_iter(html).last() {
        Some(m) => {
            let mut out = String::with_capacity(html.len() + img.len());
            out.push_str(&html[..m.start()]);
            out.push_str(&img);
            out.push_str(&html[m.start()..]);
            out
        }
        None => format!("{}{}", html, img),
    }
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

/// Escape recipient-supplied text for element content and attributes
fn escape_html(value: &str) -> String {
    escape_attr(value)
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gazette_common::config::TrackingConfig;
    use gazette_storage::models::Recipient;
    use uuid::Uuid;

    fn renderer() -> TemplateRenderer {
        let codec = TrackingCodec::new(&TrackingConfig {
            base_url: "https://annuaire.example".to_string(),
            secret: "secret".to_string(),
            fallback_url: None,
        })
        .unwrap();
        TemplateRenderer::new(Arc::new(codec))
    }

    fn campaign(html: &str) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            title: "Les nouveautés".to_string(),
            subject: "Bonjour {{first_name}}".to_string(),
            html_body: html.to_string(),
            text_body: Some("Bonjour {{name}}. Désinscription : {{unsubscribe_url}}".to_string()),
            from_address: None,
            from_name: None,
            status: "sending".to_string(),
            total_recipients: 1,
            total_sent: 0,
            total_opened: 0,
            total_clicked: 0,
            total_failed: 0,
            scheduled_at: None,
            started_at: Some(now),
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn job(campaign_id: Uuid) -> QueueJob {
        let recipient = Recipient {
            subscriber_id: Uuid::new_v4(),
            email: "claire@librairie.example".to_string(),
            name: Some("Claire Martin".to_string()),
            unsubscribed: false,
        };
        QueueJob::pending(campaign_id, &recipient, 0, Utc::now())
    }

    #[test]
    fn test_personalize_placeholders() {
        let out = personalize(
            "Hello {{ first_name }} {{last_name}} <{{email}}> {{unknown}}!",
            "claire@librairie.example",
            Some("Claire Martin"),
            "https://u",
        );
        assert_eq!(out, "Hello Claire Martin <claire@librairie.example> !");
    }

    #[test]
    fn test_pixel_injected_before_body_close() {
        let r = renderer();
        let c = campaign("<html><body><p>Bienvenue</p></BODY></html>");
        let out = r.render(&c, &job(c.id));

        let pixel = out.html_body.find("/track/open?").unwrap();
        let close = out.html_body.find("</BODY>").unwrap();
        assert!(pixel < close);
        assert_eq!(out.subject, "Bonjour Claire");
    }

    #[test]
    fn test_pixel_appended_without_body() {
        let out = inject_pixel("<p>Salut</p>", "https://t.example/track/open?c=1&s=2");
        assert!(out.starts_with("<p>Salut</p><img src=\"https://t.example/track/open?c=1&amp;s=2\""));
    }

    #[test]
    fn test_links_rewritten_except_unsubscribe_and_mailto() {
        let r = renderer();
        let c = campaign(
            r#"<body><a href="https://fromagerie.example/offre?x=1&amp;y=2">Offre</a>
<a href='mailto:contact@fromagerie.example'>Écrire</a>
<a href="{{unsubscribe_url}}">Se désinscrire</a></body>"#,
        );
        let j = job(c.id);
        let out = r.render(&c, &j);

        assert!(out.html_body.contains("/track/click?"));
        assert!(!out.html_body.contains(r#"href="https://fromagerie.example/offre"#));
        assert!(out.html_body.contains("mailto:contact@fromagerie.example"));
        assert!(out.html_body.contains(&escape_attr(&out.unsubscribe_url)));
        assert_eq!(out.html_body.matches("/track/click?").count(), 1);

        let text = out.text_body.unwrap();
        assert!(text.contains(&out.unsubscribe_url));
        assert_eq!(out.list_unsubscribe, format!("<{}>", out.unsubscribe_url));
    }

    #[test]
    fn test_recipient_fields_escaped_in_html_only() {
        let r = renderer();
        let mut c = campaign("<body><p>Bonjour {{name}} ({{email}})</p></body>");
        c.text_body = Some("Bonjour {{name}}".to_string());
        let mut j = job(c.id);
        j.name = Some("<b>Zoé</b> & \"Co\"".to_string());
        j.email = "o'neil@librairie.example".to_string();

        let out = r.render(&c, &j);
        assert!(out.html_body.contains(
            "Bonjour &lt;b&gt;Zoé&lt;/b&gt; &amp; &quot;Co&quot; (o&#39;neil@librairie.example)"
        ));
        assert!(!out.html_body.contains("<b>"));
        assert_eq!(out.text_body.unwrap(), "Bonjour <b>Zoé</b> & \"Co\"");
        assert_eq!(out.subject, "Bonjour <b>Zoé</b>");
    }
}

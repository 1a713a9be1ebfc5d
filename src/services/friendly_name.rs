//! Friendly name and bread crumb rendering

use crate::domain::ReportedState;

pub const DEFAULT_TEMPLATE: &str =
    "{{person_name}} ({{source.attributes.friendly_name}}) {{friendly_name_location}}";

/// Template value that leaves the friendly name untouched
pub const NO_TEMPLATE: &str = "NONE";

pub const MAX_BREAD_CRUMBS_CHARS: usize = 255;

/// Where a person is, as shown to humans
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationPhrase {
    /// Bread crumb entry ("Home", "Work", "Spanish Fork")
    pub crumb: String,
    /// Friendly name suffix ("is Home", "is at Work", "is in Spanish Fork")
    pub phrase: String,
}

/// Describe a location from its reported state, zone name and locality
pub fn location_phrase(
    reported: &ReportedState,
    raw_state: &str,
    zone_name: Option<&str>,
    locality: Option<&str>,
) -> LocationPhrase {
    match reported {
        ReportedState::Home => LocationPhrase {
            crumb: "Home".to_string(),
            phrase: "is Home".to_string(),
        },
        ReportedState::Zone(_) => {
            let name = zone_name.unwrap_or(raw_state).to_string();
            LocationPhrase {
                phrase: format!("is at {}", name),
                crumb: name,
            }
        }
        ReportedState::NotHome | ReportedState::Unset => match locality {
            Some(locality) => LocationPhrase {
                crumb: locality.to_string(),
                phrase: format!("is in {}", locality),
            },
            None => LocationPhrase {
                crumb: "Away".to_string(),
                phrase: "is Away".to_string(),
            },
        },
    }
}

/// Append a crumb unless it is already the last one; keep the newest 255 chars
pub fn append_bread_crumb(crumbs: &mut String, crumb: &str) {
    if crumbs.is_empty() {
        crumbs.push_str(crumb);
        return;
    }
    if crumbs.ends_with(crumb) {
        return;
    }
    crumbs.push_str("> ");
    crumbs.push_str(crumb);

    let len = crumbs.chars().count();
    if len > MAX_BREAD_CRUMBS_CHARS {
        let skip = len - MAX_BREAD_CRUMBS_CHARS;
        *crumbs = crumbs.chars().skip(skip).collect();
    }
}

/// Values a friendly-name template may reference
#[derive(Debug, Clone, Default)]
pub struct TemplateContext<'a> {
    pub person_name: &'a str,
    pub friendly_name_location: &'a str,
    pub source_entity_id: &'a str,
    pub source_state: &'a str,
    pub source_friendly_name: &'a str,
    pub target_entity_id: &'a str,
    pub target_state: &'a str,
}

impl TemplateContext<'_> {
    fn lookup(&self, name: &str) -> &str {
        match name {
            "person_name" => self.person_name,
            "friendly_name_location" => self.friendly_name_location,
            "source.entity_id" => self.source_entity_id,
            "source.state" => self.source_state,
            "source.attributes.friendly_name" => self.source_friendly_name,
            "target.entity_id" => self.target_entity_id,
            "target.state" => self.target_state,
            _ => "",
        }
    }
}

/// Render `{{ name }}` placeholders, then tidy the result
///
/// Unknown names render empty. Empty parentheses are removed and runs of
/// spaces collapsed, so a missing source name leaves no trace.
pub fn render(template: &str, ctx: &TemplateContext<'_>) -> String {
    let mut out = String::with_capacity(template.len() + 32);
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                out.push_str(ctx.lookup(after[..end].trim()));
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    let mut tidy = out.replace("()", "");
    while tidy.contains("  ") {
        tidy = tidy.replace("  ", " ");
    }
    tidy.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(source_friendly_name: &'a str, location: &'a str) -> TemplateContext<'a> {
        TemplateContext {
            person_name: "Rod",
            friendly_name_location: location,
            source_entity_id: "device_tracker.rod_iphone",
            source_state: "not_home",
            source_friendly_name,
            target_entity_id: "sensor.rod_location",
            target_state: "Away",
        }
    }

    #[test]
    fn test_default_template() {
        let name = render(DEFAULT_TEMPLATE, &ctx("Rod-iPhone-16", "is in Spanish Fork"));
        assert_eq!(name, "Rod (Rod-iPhone-16) is in Spanish Fork");
    }

    #[test]
    fn test_missing_source_name_is_tidied() {
        let name = render(DEFAULT_TEMPLATE, &ctx("", "is Home"));
        assert_eq!(name, "Rod is Home");
    }

    #[test]
    fn test_unknown_placeholder_and_unclosed_braces() {
        let name = render("{{ person_name }} {{nope}} is {{target.state", &ctx("x", "is Home"));
        assert_eq!(name, "Rod is {{target.state");
    }

    #[test]
    fn test_location_phrases() {
        let home = location_phrase(&ReportedState::Home, "home", None, Some("Provo"));
        assert_eq!(home.phrase, "is Home");

        let zone = location_phrase(&ReportedState::Zone("work".into()), "Work", Some("Office"), None);
        assert_eq!(zone.crumb, "Office");
        assert_eq!(zone.phrase, "is at Office");

        let raw_zone = location_phrase(&ReportedState::Zone("gym".into()), "Gym", None, None);
        assert_eq!(raw_zone.phrase, "is at Gym");

        let away = location_phrase(&ReportedState::NotHome, "not_home", None, None);
        assert_eq!(away.phrase, "is Away");

        let town = location_phrase(&ReportedState::NotHome, "not_home", None, Some("Provo"));
        assert_eq!(town.crumb, "Provo");
        assert_eq!(town.phrase, "is in Provo");
    }

    #[test]
    fn test_bread_crumbs() {
        let mut crumbs = String::new();
        append_bread_crumb(&mut crumbs, "Home");
        append_bread_crumb(&mut crumbs, "Home");
        append_bread_crumb(&mut crumbs, "Provo");
        assert_eq!(crumbs, "Home> Provo");
    }

    #[test]
    fn test_bread_crumbs_keep_newest_chars() {
        let mut crumbs = String::new();
        for i in 0..100 {
            append_bread_crumb(&mut crumbs, &format!("Town{}", i));
        }
        assert_eq!(crumbs.chars().count(), MAX_BREAD_CRUMBS_CHARS);
        assert!(crumbs.ends_with("> Town99"));
    }
}

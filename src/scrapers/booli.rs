use crate::fetch::Page;
use crate::models::{Condition, Location, RawListing};
use crate::scrapers::traits::SiteSource;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

pub const SOURCE_NAME: &str = "booli";

struct Selectors {
    card: Selector,
    heading: Selector,
    price: Selector,
    facts: Selector,
    tags: Selector,
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            card: parse_selector("a.object-card-link")?,
            heading: parse_selector("h1")?,
            price: parse_selector("span.object-card__price--logo")?,
            facts: parse_selector("li[aria-label]")?,
            tags: parse_selector("div.tag")?,
        })
    }
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector {}: {:?}", css, e))
}

/// Booli listing pages, fetched from a configured URL list
pub struct BooliSource {
    urls: Vec<String>,
    city: String,
    selectors: Selectors,
}

impl BooliSource {
    pub fn new(urls: Vec<String>) -> Result<Self> {
        Self::with_city(urls, "Stockholm")
    }

    pub fn with_city(urls: Vec<String>, city: impl Into<String>) -> Result<Self> {
        Ok(Self {
            urls,
            city: city.into(),
            selectors: Selectors::new()?,
        })
    }

    fn parse_listing(&self, page: &Page) -> Option<RawListing> {
        let document = Html::parse_document(&page.body);
        let root = document.root_element();

        // "2 rum lägenhet på Götgatan 120 Södermalm, Stockholms kommun"
        let label = root
            .select(&self.selectors.card)
            .next()
            .and_then(|card| card.value().attr("aria-label").map(decode))
            .or_else(|| root.select(&self.selectors.heading).next().map(text_of))
            .unwrap_or_default();
        debug!("Processing: {}", label);

        let mut rooms = parse_rooms(&label);
        let (address, neighborhood) = parse_address(&label);

        let mut size = None;
        for fact in root.select(&self.selectors.facts) {
            let Some(aria) = fact.value().attr("aria-label").map(decode) else {
                continue;
            };
            if aria.contains("kvadratmeter") {
                size = parse_decimal(&aria);
            } else if rooms.is_none() && aria.contains("rum") {
                rooms = parse_rooms(&aria);
            }
        }

        let price = root
            .select(&self.selectors.price)
            .next()
            .map(text_of)
            .and_then(|t| parse_digits(&t));

        let features: Vec<String> = root
            .select(&self.selectors.tags)
            .map(text_of)
            .filter(|f| !f.is_empty() && f != "Snart till salu")
            .collect();

        if price.is_none() && size.is_none() {
            info!("Skipped page {}: no price or size found", page.url);
            return None;
        }

        let lower = label.to_lowercase();
        Some(RawListing {
            id: listing_id(&page.url),
            source: SOURCE_NAME.to_string(),
            url: page.url.clone(),
            title: (!label.is_empty()).then(|| label.clone()),
            address,
            property_type: lower.contains("lägenhet").then(|| "apartment".to_string()),
            operation_type: Some("sale".to_string()),
            price,
            size,
            rooms,
            bathrooms: None,
            floor: None,
            has_elevator: Some(features.iter().any(|f| f == "Hiss")),
            condition: Condition::Unknown,
            features,
            location: Location {
                city: Some(self.city.clone()),
                neighborhood,
                latitude: None,
                longitude: None,
            },
        })
    }
}

#[async_trait]
impl SiteSource for BooliSource {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    async fn targets(&self) -> Result<Vec<String>> {
        Ok(self.urls.clone())
    }

    fn extract(&self, page: &Page) -> Result<Option<RawListing>> {
        Ok(self.parse_listing(page))
    }
}

fn decode(raw: &str) -> String {
    raw.replace("&nbsp;", " ").replace('\u{a0}', " ")
}

fn text_of(element: ElementRef<'_>) -> String {
    decode(element.text().collect::<String>().trim())
}

/// Last path segment of the listing URL
fn listing_id(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

fn parse_digits(text: &str) -> Option<f64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse::<f64>().ok()
}

fn parse_decimal(text: &str) -> Option<f64> {
    let number: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    number.replace(',', ".").parse::<f64>().ok()
}

fn parse_rooms(text: &str) -> Option<u32> {
    if !text.contains("rum") {
        return None;
    }
    let before = text.split("rum").next()?;
    let word = before.split_whitespace().last()?;
    let rooms = word.replace(',', ".").parse::<f64>().ok()?;
    Some(rooms.floor() as u32)
}

/// Address and neighborhood from "... på <street> <number> <area>, <municipality>"
fn parse_address(label: &str) -> (Option<String>, Option<String>) {
    let Some(pos) = label.find("på ") else {
        return (None, None);
    };
    let after = &label[pos + "på ".len()..];
    let street = after.split(',').next().unwrap_or(after).trim();
    if street.is_empty() {
        return (None, None);
    }

    let neighborhood = street
        .rsplit(' ')
        .next()
        .filter(|w| w.chars().next().map_or(false, |c| c.is_alphabetic()))
        .filter(|w| *w != street)
        .map(str::to_string);

    (Some(street.to_string()), neighborhood)
}

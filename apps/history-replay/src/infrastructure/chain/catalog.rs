//! Sensor catalog discovery.
//!
//! Walks site → `ch:devices` → device → `ch:sensors` → sensor and records
//! every sensor's URL, metric and owning device.

use super::hal::HalDocument;
use super::{ChainClient, ChainError};
use crate::domain::sensor::{SensorCatalog, SensorId, SensorRef};

/// Metric recorded for sensors that do not declare one.
const UNKNOWN_METRIC: &str = "unknown";

/// Build the sensor catalog of the site at `site_url`.
///
/// Devices without a sensors link and sensors without a self link are
/// skipped with a warning.
///
/// # Errors
///
/// Returns [`ChainError`] if a document cannot be fetched or the site has
/// no devices link.
pub async fn discover_catalog(
    client: &ChainClient,
    site_url: &str,
    max_pages: u32,
) -> Result<SensorCatalog, ChainError> {
    let site: HalDocument = client.get_json(site_url).await?;
    let devices_url = site
        .links
        .href("ch:devices")
        .ok_or_else(|| ChainError::MissingLink {
            url: site_url.to_string(),
            rel: "ch:devices",
        })?;

    let devices = collection_items(client, devices_url, max_pages).await?;
    let mut catalog = SensorCatalog::new();

    for (index, device) in devices.iter().enumerate() {
        let Some(sensors_url) = device.links.href("ch:sensors") else {
            tracing::warn!(
                device = device.self_href().unwrap_or("<unnamed>"),
                "Device has no sensors link, skipping"
            );
            continue;
        };

        for sensor in collection_items(client, sensors_url, max_pages).await? {
            let Some(href) = sensor.self_href() else {
                tracing::warn!(device_index = index, "Sensor has no self link, skipping");
                continue;
            };
            let metric = sensor.str_property("metric").unwrap_or(UNKNOWN_METRIC);
            catalog.insert(SensorRef::new(SensorId::new(href), metric).with_device(index));
        }
    }

    tracing::info!(
        site = site_url,
        devices = devices.len(),
        sensors = catalog.len(),
        metrics = ?catalog.metric_counts(),
        "Sensor catalog loaded"
    );

    Ok(catalog)
}

/// Resolve the items of a collection, following `next` pages.
///
/// Embedded items are used when present; otherwise each linked item is
/// fetched.
async fn collection_items(
    client: &ChainClient,
    url: &str,
    max_pages: u32,
) -> Result<Vec<HalDocument>, ChainError> {
    let mut items = Vec::new();
    let mut next = Some(url.to_string());
    let mut pages = 0;

    while let Some(page_url) = next.take() {
        if pages >= max_pages {
            tracing::warn!(url, max_pages, "Collection page limit reached, truncating");
            break;
        }
        pages += 1;

        let page: HalDocument = client.get_json(&page_url).await?;
        let embedded = page.embedded("items");
        if embedded.is_empty() {
            for href in page.links.hrefs("items") {
                items.push(client.get_json(href).await?);
            }
        } else {
            items.extend(embedded);
        }
        next = page.links.href("next").map(str::to_string);
    }

    Ok(items)
}

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{error::TrackerError, position::Position, route::RoadRouter};

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: OsrmGeometry,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    // GeoJSON order: [longitude, latitude]
    coordinates: Vec<[f64; 2]>,
}

/// Road snapping through an OSRM `route` service.
pub struct OsrmRouter {
    base_url: String,
    client: reqwest::Client,
}

impl OsrmRouter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TrackerError::Config(format!("Failed to create HTTP client: {err}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn route_url(&self, from: &Position, to: &Position) -> String {
        format!(
            "{}/route/v1/driving/{},{};{},{}?overview=full&geometries=geojson",
            self.base_url,
            from.lng(),
            from.lat(),
            to.lng(),
            to.lat()
        )
    }
}

fn into_route(response: OsrmResponse) -> Result<Vec<Position>, TrackerError> {
    if response.code != "Ok" {
        return Err(TrackerError::RoutingLookupFailed(format!("service answered {}", response.code)));
    }

    let Some(route) = response.routes.into_iter().next() else {
        return Err(TrackerError::RoutingLookupFailed("no route found".into()));
    };

    route
        .geometry
        .coordinates
        .into_iter()
        .map(|[lng, lat]| Position::new(lat, lng))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| TrackerError::RoutingLookupFailed(err.to_string()))
}

#[async_trait]
impl RoadRouter for OsrmRouter {
    async fn route(&self, from: Position, to: Position) -> Result<Vec<Position>, TrackerError> {
        let url = self.route_url(&from, &to);
        tracing::debug!("Requesting road route: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| TrackerError::RoutingLookupFailed(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackerError::RoutingLookupFailed(format!("HTTP {status}")));
        }

        let body = response
            .json::<OsrmResponse>()
            .await
            .map_err(|err| TrackerError::RoutingLookupFailed(format!("malformed response: {err}")))?;

        into_route(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_lng_lat_url() {
        let router = OsrmRouter::new("http://localhost:5000/", Duration::from_secs(1)).unwrap();
        let url = router.route_url(
            &Position::new(40.758, -73.9855).unwrap(),
            &Position::new(11.838993, 75.568532).unwrap(),
        );
        assert_eq!(
            url,
            "http://localhost:5000/route/v1/driving/-73.9855,40.758;75.568532,11.838993?overview=full&geometries=geojson"
        );
    }

    fn parse_route(body: &str) -> Result<Vec<Position>, TrackerError> {
        into_route(serde_json::from_str(body).unwrap())
    }

    #[test]
    fn parses_geojson_geometry() {
        let body = r#"{"code":"Ok","routes":[{"geometry":{"type":"LineString","coordinates":[[-73.9855,40.758],[-73.99,40.75]]},"distance":1200.5}],"waypoints":[]}"#;
        let route = parse_route(body).unwrap();
        assert_eq!(route.len(), 2);
        assert_eq!(route[0].lat(), 40.758);
        assert_eq!(route[0].lng(), -73.9855);
    }

    #[test]
    fn maps_failures_to_routing_errors() {
        assert!(serde_json::from_str::<OsrmResponse>("not json").is_err());
        assert!(matches!(
            parse_route(r#"{"code":"NoRoute","message":"Impossible route"}"#),
            Err(TrackerError::RoutingLookupFailed(_))
        ));
        assert!(matches!(
            parse_route(r#"{"code":"Ok","routes":[]}"#),
            Err(TrackerError::RoutingLookupFailed(_))
        ));
        assert!(matches!(
            parse_route(r#"{"code":"Ok","routes":[{"geometry":{"coordinates":[[200.0,40.0]]}}]}"#),
            Err(TrackerError::RoutingLookupFailed(_))
        ));
    }
}

use serde::Deserialize;
use std::collections::HashMap;

use crate::model::Availability;

/// One provider entry inside a region's offer lists. The response carries
/// name and logo fields too; only the id matters here.
#[derive(Deserialize, Debug)]
pub struct ProviderRef {
    pub provider_id: i64,
}

/// Offer lists for one region, keyed by access mode.
#[derive(Deserialize, Debug, Default)]
pub struct RegionOffers {
    #[serde(default)]
    pub flatrate: Vec<ProviderRef>,
    #[serde(default)]
    pub rent: Vec<ProviderRef>,
    #[serde(default)]
    pub buy: Vec<ProviderRef>,
}

impl RegionOffers {
    pub fn into_availability(self) -> Availability {
        Availability {
            streaming: self.flatrate.into_iter().map(|p| p.provider_id).collect(),
            rent: self.rent.into_iter().map(|p| p.provider_id).collect(),
            buy: self.buy.into_iter().map(|p| p.provider_id).collect(),
        }
    }
}

/// `GET /3/{movie|tv}/{id}/watch/providers` response: offers keyed by
/// ISO 3166-1 region code.
#[derive(Deserialize, Debug, Default)]
pub struct WatchProvidersResp {
    #[serde(default)]
    pub results: HashMap<String, RegionOffers>,
}

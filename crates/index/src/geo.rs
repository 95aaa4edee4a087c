//! Geo index
//!
//! Two variants over one coordinate table: geo1 indexes a single
//! list-valued attribute holding a coordinate pair (element order decided
//! by the `geoJson` flag), geo2 indexes two separate numeric attributes.
//!
//! A `constraint` index rejects documents it cannot index with
//! `GeoIndexViolated`, unless `ignoreNull` forgives the ones whose
//! coordinates are merely missing. Without `constraint`, non-indexable
//! documents are skipped silently.
//!
//! Lookup primitives are `within` (radius filter) and `nearest` (count
//! limit), both computing great-circle distances.

use crate::{Index, IndexKind};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use tracing::debug;
use vellum_core::{DocumentRef, Error, IndexId, PathId, Result, ShapedDocument, Shaper};

/// Mean Earth radius in meters, used for great-circle distances
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// A latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoCoordinate {
    /// Latitude in degrees, -90..=90
    pub latitude: f64,
    /// Longitude in degrees, -180..=180
    pub longitude: f64,
}

impl GeoCoordinate {
    fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to another coordinate, in meters
    pub fn distance_to(&self, other: &GeoCoordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
    }
}

/// Attribute layout of a geo index
#[derive(Debug, Clone, Copy)]
enum GeoVariant {
    /// One list attribute `[lat, lng]`, or `[lng, lat]` when `geo_json`
    Location { location: PathId, geo_json: bool },
    /// Two numeric attributes
    Pair { latitude: PathId, longitude: PathId },
}

/// Outcome of coordinate extraction from one document revision
enum Extracted {
    Ok(GeoCoordinate),
    Missing,
    Invalid,
}

/// Geo index over one list attribute or two numeric attributes
#[derive(Debug)]
pub struct GeoIndex {
    id: IndexId,
    variant: GeoVariant,
    constraint: bool,
    ignore_null: bool,
    fields: Vec<String>,
    shaper: Arc<Shaper>,
    table: RwLock<FxHashMap<String, (GeoCoordinate, DocumentRef)>>,
}

impl GeoIndex {
    /// Create a geo1 index over one list-valued attribute
    pub fn new_location(
        id: IndexId,
        shaper: Arc<Shaper>,
        field: String,
        location: PathId,
        geo_json: bool,
        constraint: bool,
        ignore_null: bool,
    ) -> Self {
        GeoIndex {
            id,
            variant: GeoVariant::Location { location, geo_json },
            constraint,
            ignore_null,
            fields: vec![field],
            shaper,
            table: RwLock::new(FxHashMap::default()),
        }
    }

    /// Create a geo2 index over two numeric attributes
    pub fn new_pair(
        id: IndexId,
        shaper: Arc<Shaper>,
        latitude_field: String,
        longitude_field: String,
        latitude: PathId,
        longitude: PathId,
        constraint: bool,
        ignore_null: bool,
    ) -> Self {
        GeoIndex {
            id,
            variant: GeoVariant::Pair {
                latitude,
                longitude,
            },
            constraint,
            ignore_null,
            fields: vec![latitude_field, longitude_field],
            shaper,
            table: RwLock::new(FxHashMap::default()),
        }
    }

    /// Documents within `radius` meters of the given point, closest first
    pub fn within(&self, latitude: f64, longitude: f64, radius: f64) -> Vec<(DocumentRef, f64)> {
        let origin = GeoCoordinate {
            latitude,
            longitude,
        };
        let mut hits: Vec<(DocumentRef, f64)> = self
            .table
            .read()
            .values()
            .filter_map(|(coord, doc)| {
                let distance = origin.distance_to(coord);
                (distance <= radius).then(|| (Arc::clone(doc), distance))
            })
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }

    /// The `count` documents closest to the given point
    pub fn nearest(&self, latitude: f64, longitude: f64, count: usize) -> Vec<(DocumentRef, f64)> {
        let origin = GeoCoordinate {
            latitude,
            longitude,
        };
        let mut hits: Vec<(DocumentRef, f64)> = self
            .table
            .read()
            .values()
            .map(|(coord, doc)| (Arc::clone(doc), origin.distance_to(coord)))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits.truncate(count);
        hits
    }

    /// Number of indexed documents
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Whether the index holds no documents
    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    fn extract(&self, shaped: &ShapedDocument) -> Extracted {
        match self.variant {
            GeoVariant::Location { location, geo_json } => {
                let Some(value) = self.shaper.extract(shaped, location) else {
                    return Extracted::Missing;
                };
                let Value::Array(items) = value else {
                    return Extracted::Invalid;
                };
                if items.len() < 2 {
                    return Extracted::Invalid;
                }
                let (Some(first), Some(second)) = (items[0].as_f64(), items[1].as_f64()) else {
                    return Extracted::Invalid;
                };
                let (latitude, longitude) = if geo_json {
                    (second, first)
                } else {
                    (first, second)
                };
                Extracted::Ok(GeoCoordinate {
                    latitude,
                    longitude,
                })
            }
            GeoVariant::Pair {
                latitude,
                longitude,
            } => {
                let lat = self.shaper.extract(shaped, latitude);
                let lon = self.shaper.extract(shaped, longitude);
                match (lat, lon) {
                    (Some(lat), Some(lon)) => match (lat.as_f64(), lon.as_f64()) {
                        (Some(latitude), Some(longitude)) => Extracted::Ok(GeoCoordinate {
                            latitude,
                            longitude,
                        }),
                        _ => Extracted::Invalid,
                    },
                    _ => Extracted::Missing,
                }
            }
        }
    }

    /// Shared insert path for `insert` and the second half of `update`
    fn insert_extracted(&self, extracted: Extracted, doc: &DocumentRef) -> Result<()> {
        match extracted {
            Extracted::Ok(coord) => {
                if !coord.is_valid() {
                    // illegal coordinates are a violation only for constraints
                    if self.constraint {
                        debug!(doc = doc.key(), "illegal geo coordinates");
                        return Err(Error::GeoIndexViolated);
                    }
                    return Ok(());
                }
                self.table
                    .write()
                    .insert(doc.key().to_string(), (coord, Arc::clone(doc)));
                Ok(())
            }
            Extracted::Missing => {
                if self.constraint && !self.ignore_null {
                    return Err(Error::GeoIndexViolated);
                }
                Ok(())
            }
            Extracted::Invalid => {
                if self.constraint {
                    return Err(Error::GeoIndexViolated);
                }
                Ok(())
            }
        }
    }
}

impl Index for GeoIndex {
    fn id(&self) -> IndexId {
        self.id
    }

    fn kind(&self) -> IndexKind {
        match self.variant {
            GeoVariant::Location { .. } => IndexKind::Geo1,
            GeoVariant::Pair { .. } => IndexKind::Geo2,
        }
    }

    fn is_unique(&self) -> bool {
        false
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn insert(&self, doc: &DocumentRef) -> Result<()> {
        self.insert_extracted(self.extract(doc.shaped()), doc)
    }

    fn update(&self, new_doc: &DocumentRef, old: &ShapedDocument) -> Result<()> {
        // drop the entry derived from the old revision, if it had one
        if let Extracted::Ok(_) = self.extract(old) {
            self.table.write().remove(new_doc.key());
        }
        self.insert_extracted(self.extract(new_doc.shaped()), new_doc)
    }

    fn remove(&self, doc: &DocumentRef) -> Result<()> {
        if let Extracted::Ok(_) = self.extract(doc.shaped()) {
            if self.table.write().remove(doc.key()).is_none() {
                debug!(doc = doc.key(), "geo entry already absent");
            }
        }
        Ok(())
    }

    fn describe(&self) -> Value {
        match self.variant {
            GeoVariant::Location { geo_json, .. } => {
                let mut desc = json!({
                    "id": self.id.as_u64(),
                    "type": "geo1",
                    "geoJson": geo_json,
                    "constraint": self.constraint,
                    "fields": self.fields,
                });
                if self.constraint {
                    desc["ignoreNull"] = json!(self.ignore_null);
                }
                desc
            }
            GeoVariant::Pair { .. } => {
                let mut desc = json!({
                    "id": self.id.as_u64(),
                    "type": "geo2",
                    "constraint": self.constraint,
                    "fields": self.fields,
                });
                if self.constraint {
                    desc["ignoreNull"] = json!(self.ignore_null);
                }
                desc
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

//! Protobuf parser for GTFS Realtime feeds, with vendor extension support.

use prost::Message;

use crate::error::FeedError;
use crate::gtfs_rt::FeedMessage;

/// A vendor extension field this crate knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VendorExtension {
    /// `de.mfdz` route metadata on `TripDescriptor`.
    MfdzTripDescriptor,
    /// `de.mfdz` pickup/drop-off types on `StopTimeProperties`.
    MfdzStopTimeProperties,
}

impl VendorExtension {
    pub const ALL: [VendorExtension; 2] = [
        VendorExtension::MfdzTripDescriptor,
        VendorExtension::MfdzStopTimeProperties,
    ];

    /// Fully qualified name of the message this extension extends.
    pub fn extendee(self) -> &'static str {
        match self {
            VendorExtension::MfdzTripDescriptor => "transit_realtime.TripDescriptor",
            VendorExtension::MfdzStopTimeProperties => {
                "transit_realtime.TripUpdate.StopTimeUpdate.StopTimeProperties"
            }
        }
    }

    pub fn field_number(self) -> u32 {
        match self {
            VendorExtension::MfdzTripDescriptor | VendorExtension::MfdzStopTimeProperties => 1013,
        }
    }

    fn bit(self) -> u8 {
        match self {
            VendorExtension::MfdzTripDescriptor => 1,
            VendorExtension::MfdzStopTimeProperties => 1 << 1,
        }
    }
}

/// Closed set of vendor extensions kept while decoding.
///
/// Built once and passed by value to every [`parse_feed`] call. Extension
/// fields outside the registry are dropped from the decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionRegistry {
    mask: u8,
}

impl ExtensionRegistry {
    pub const fn empty() -> Self {
        Self { mask: 0 }
    }

    /// Every vendor extension known at build time.
    pub fn all() -> Self {
        VendorExtension::ALL
            .into_iter()
            .fold(Self::empty(), ExtensionRegistry::with)
    }

    pub fn with(self, ext: VendorExtension) -> Self {
        Self {
            mask: self.mask | ext.bit(),
        }
    }

    pub fn contains(&self, ext: VendorExtension) -> bool {
        self.mask & ext.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = VendorExtension> + '_ {
        VendorExtension::ALL
            .into_iter()
            .filter(|ext| self.contains(*ext))
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::all()
    }
}

/// Decodes a protobuf-encoded GTFS-RT [`FeedMessage`] from raw bytes.
///
/// # Errors
///
/// Returns [`FeedError::Decode`] if the bytes are not valid protobuf for a
/// `FeedMessage`.
pub fn parse_feed(bytes: &[u8], registry: &ExtensionRegistry) -> Result<FeedMessage, FeedError> {
    let mut feed = FeedMessage::decode(bytes)?;
    strip_unregistered(&mut feed, registry);
    Ok(feed)
}

fn strip_unregistered(feed: &mut FeedMessage, registry: &ExtensionRegistry) {
    let keep_trip = registry.contains(VendorExtension::MfdzTripDescriptor);
    let keep_stop_time = registry.contains(VendorExtension::MfdzStopTimeProperties);
    if keep_trip && keep_stop_time {
        return;
    }

    for entity in &mut feed.entity {
        if let Some(tu) = entity.trip_update.as_mut() {
            if !keep_trip {
                tu.trip.mfdz_trip_descriptor = None;
            }
            if !keep_stop_time {
                tu.stop_time_update
                    .iter_mut()
                    .filter_map(|stu| stu.stop_time_properties.as_mut())
                    .for_each(|props| props.mfdz_stop_time_properties = None);
            }
        }

        if keep_trip {
            continue;
        }
        if let Some(trip) = entity.vehicle.as_mut().and_then(|v| v.trip.as_mut()) {
            trip.mfdz_trip_descriptor = None;
        }
        if let Some(alert) = entity.alert.as_mut() {
            alert
                .informed_entity
                .iter_mut()
                .filter_map(|sel| sel.trip.as_mut())
                .for_each(|trip| trip.mfdz_trip_descriptor = None);
        }
    }
}

pub mod aircraft;
pub mod clock;
pub mod decode;
pub mod geomag;
pub mod source;
pub mod state;
pub mod stats;
pub mod store;
pub mod tiles;
pub mod trace;
pub mod tracker;

pub mod prelude {
    /// deku traits, needed wherever frames are parsed from bytes
    pub use deku::prelude::*;

    pub use crate::aircraft::{Aircraft, AddressType, AirGround};
    pub use crate::decode::adsb::{Adsb, Me};
    pub use crate::decode::cpr::Position;
    /// decoded Mode S frame, the entry point of the library
    pub use crate::decode::Frame;
    pub use crate::decode::Df::*;
    pub use crate::decode::{Df, Icao};
    pub use crate::source::DataSource;
    pub use crate::store::Registry;
    pub use crate::tracker::{Message, Tracker};
}

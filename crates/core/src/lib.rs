pub mod actor;
pub mod duration;
pub mod error;
pub mod kind;
pub mod policy;
pub mod punishment;
pub mod types;

pub use actor::ActorQuota;
pub use duration::{PERMANENT, format_duration, parse_duration};
pub use error::ModelError;
pub use kind::RestrictionKind;
pub use policy::{
    DEFAULT_BAN_QUOTA, DEFAULT_DURATIONS, DEFAULT_GROUP, DEFAULT_MUTE_QUOTA, GroupPolicies,
    GroupPolicy,
};
pub use punishment::{NewPunishment, PunishmentRecord};
pub use types::{AccountKey, VolunteerId};

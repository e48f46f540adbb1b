use strum::AsRefStr;
use strum::EnumIter;
use strum::EnumString;
use strum::IntoEnumIterator;
use strum::IntoStaticStr;

/// Vendor naming convention for values transmitted as 100x their real unit.
pub const X100_SUFFIX: &str = "x100";

/// Datapoints requested from the Salus group datapoints endpoint.
///
/// The string form is the vendor's property name, e.g.
/// `ep_9:sIT600TH:LocalTemperature_x100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, EnumIter, EnumString, IntoStaticStr)]
pub enum PropertyKey {
    #[strum(serialize = "ep_9:sIT600TH:LocalTemperature_x100")]
    Temperature,
    #[strum(serialize = "ep_9:sIT600TH:RunningState")]
    RunningState,
    #[strum(serialize = "ep_9:sIT600TH:CloudySetpoint_x100")]
    CloudySetpoint,
    #[strum(serialize = "ep_9:sIT600TH:SunnySetpoint_x100")]
    SunnySetpoint,
    #[strum(serialize = "ep_9:sIT600TH:CoolingControl")]
    CoolingControl,
    #[strum(serialize = "ep_9:sIT600TH:HeatingControl")]
    HeatingControl,
    #[strum(serialize = "ep_9:sIT600TH:HoldType")]
    HoldType,
    #[strum(serialize = "ep_9:sIT600TH:OUTSensorProbe")]
    SensorProbe,
    #[strum(serialize = "ep_9:sIT600TH:ScheduleType")]
    ScheduleType,
    #[strum(serialize = "ep_9:sIT600TH:RunningMode")]
    RunningMode,
    #[strum(serialize = "ep_9:sIT600TH:SystemMode")]
    SystemMode,
    #[strum(serialize = "ep_9:sZDO:LeaveNetwork")]
    LeaveNetwork,
    #[strum(serialize = "ep_9:sZDOInfo:OnlineStatus_i")]
    OnlineStatus,
}

/// How a raw datapoint maps to a real-world value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scaling {
    /// Stored as-is.
    Raw,
    /// Divided by 100 (centidegrees and the like).
    Hundredths,
}

impl Scaling {
    /// Scaling rule implied by a property name.
    pub fn for_name(name: &str) -> Self {
        if name.ends_with(X100_SUFFIX) {
            Scaling::Hundredths
        } else {
            Scaling::Raw
        }
    }
}

impl PropertyKey {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn scaling(self) -> Scaling {
        Scaling::for_name(self.name())
    }

    /// Keys a decoded record must carry whenever they were requested.
    pub fn is_required(self) -> bool {
        matches!(self, PropertyKey::Temperature | PropertyKey::RunningState)
    }

    pub fn all() -> Vec<PropertyKey> {
        PropertyKey::iter().collect()
    }
}

pub mod settings;

pub use settings::{
    BrokerSettings, ResponderSettings, SessionSettings, Settings, StreamingSettings,
    TransportSettings,
};

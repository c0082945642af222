#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use eventory::{
    impl_aggregate, DocEventStore, Event, EventCodec, EventPayload, EventTypeRegistry,
    EventoryError, InMemoryDocClient, InMemoryListClient, ListEventStore, Root, StateCapture,
};

// ----------------------------------------------------------------------------
// Payloads
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildFounded {
    pub name: String,
}

impl EventPayload for GuildFounded {
    const EVENT_TYPE: &'static str = "GuildFounded";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemberJoined {
    pub member: String,
}

impl EventPayload for MemberJoined {
    const EVENT_TYPE: &'static str = "MemberJoined";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OreDeposited {
    pub ore: String,
    pub quantity: u64,
}

impl EventPayload for OreDeposited {
    const EVENT_TYPE: &'static str = "OreDeposited";
}

// ----------------------------------------------------------------------------
// Guild aggregate
// ----------------------------------------------------------------------------

#[derive(Default, Debug)]
pub struct Guild {
    pub root: Root,
    pub name: String,
    pub members: Vec<String>,
    pub stock: BTreeMap<String, u64>,
    /// Instrumentation: number of events applied through replay.
    pub applied: u64,
}

impl Guild {
    pub fn found(id: &str, name: &str) -> Self {
        let mut guild = Guild::default();
        guild.root.set_id(id);
        guild.name = name.to_string();
        guild.root.record(Box::new(GuildFounded {
            name: name.to_string(),
        }));
        guild
    }

    pub fn join(&mut self, member: &str) {
        self.members.push(member.to_string());
        self.root.record(Box::new(MemberJoined {
            member: member.to_string(),
        }));
    }

    pub fn deposit(&mut self, ore: &str, quantity: u64) {
        *self.stock.entry(ore.to_string()).or_insert(0) += quantity;
        self.root.record(Box::new(OreDeposited {
            ore: ore.to_string(),
            quantity,
        }));
    }

    pub fn apply_event(&mut self, event: &Event) -> Result<(), EventoryError> {
        self.applied += 1;
        match event.event_type() {
            "GuildFounded" => {
                let founded = payload::<GuildFounded>(event)?;
                self.name = founded.name.clone();
            }
            "MemberJoined" => {
                let joined = payload::<MemberJoined>(event)?;
                self.members.push(joined.member.clone());
            }
            "OreDeposited" => {
                let deposited = payload::<OreDeposited>(event)?;
                *self.stock.entry(deposited.ore.clone()).or_insert(0) += deposited.quantity;
            }
            other => return Err(EventoryError::UnknownEventType(other.to_string())),
        }
        Ok(())
    }
}

fn payload<T: 'static>(event: &Event) -> Result<&T, EventoryError> {
    event.payload_as::<T>().ok_or_else(|| {
        EventoryError::Serialization(format!("payload type mismatch for {}", event.event_type()))
    })
}

impl_aggregate!(Guild, "guild", root, apply_event);

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct GuildState {
    pub name: String,
    pub members: Vec<String>,
    pub stock: BTreeMap<String, u64>,
}

impl StateCapture for Guild {
    type State = GuildState;

    fn capture(&self) -> GuildState {
        GuildState {
            name: self.name.clone(),
            members: self.members.clone(),
            stock: self.stock.clone(),
        }
    }

    fn restore(&mut self, state: GuildState) {
        self.name = state.name;
        self.members = state.members;
        self.stock = state.stock;
    }
}

// ----------------------------------------------------------------------------
// Wiring helpers
// ----------------------------------------------------------------------------

pub fn registry() -> EventTypeRegistry {
    let registry = EventTypeRegistry::new();
    registry.register::<GuildFounded>().unwrap();
    registry.register::<MemberJoined>().unwrap();
    registry.register::<OreDeposited>().unwrap();
    registry
}

pub fn codec() -> EventCodec {
    EventCodec::new(registry())
}

pub fn list_event_store() -> Arc<ListEventStore<InMemoryListClient>> {
    Arc::new(ListEventStore::new(
        Arc::new(InMemoryListClient::new()),
        codec(),
    ))
}

pub fn doc_event_store() -> Arc<DocEventStore<InMemoryDocClient>> {
    Arc::new(DocEventStore::new(Arc::new(InMemoryDocClient::new()), codec()).unwrap())
}

/// A bare envelope for direct store-level tests; identity and version
/// are stamped by the store on append.
pub fn joined(member: &str) -> Event {
    Event::new(
        "",
        "",
        0,
        Box::new(MemberJoined {
            member: member.to_string(),
        }),
    )
}

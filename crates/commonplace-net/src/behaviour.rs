//! libp2p behaviour for commonplace peers: gossipsub carries the presence
//! topic, Kademlia finds peers beyond the bootstrap list, identify feeds
//! listen addresses into Kademlia.

use libp2p::{
    gossipsub, identify,
    kad::{self, store::MemoryStore},
    swarm::NetworkBehaviour,
};

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "CommonplaceEvent")]
pub struct CommonplaceBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub kademlia: kad::Behaviour<MemoryStore>,
    pub identify: identify::Behaviour,
}

#[derive(Debug)]
pub enum CommonplaceEvent {
    Gossipsub(gossipsub::Event),
    Kademlia(kad::Event),
    Identify(identify::Event),
}

impl From<gossipsub::Event> for CommonplaceEvent {
    fn from(event: gossipsub::Event) -> Self {
        CommonplaceEvent::Gossipsub(event)
    }
}

impl From<kad::Event> for CommonplaceEvent {
    fn from(event: kad::Event) -> Self {
        CommonplaceEvent::Kademlia(event)
    }
}

impl From<identify::Event> for CommonplaceEvent {
    fn from(event: identify::Event) -> Self {
        CommonplaceEvent::Identify(event)
    }
}

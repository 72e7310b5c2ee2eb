use log::debug;
use mwfd_core::lp::NackReason;
use mwfd_core::name::Name;
use mwfd_core::packets::Interest;

use crate::face::FaceId;
use crate::fw::forwarder::StrategyApi;
use crate::fw::strategy::Strategy;
use crate::tables::fib::NextHop;
use crate::tables::pit::PitEntryId;

/// Forwards every Interest to all eligible next-hops, and offers pending
/// Interests to next-hops that appear later.
pub struct MulticastStrategy {
    name: Name,
}

impl MulticastStrategy {
    pub fn strategy_name() -> Name {
        let mut name = Name::from_uri("/localhost/mwfd/strategy/multicast").unwrap();
        name.append_version(1);
        name
    }

    pub fn new(name: Name) -> Self {
        Self { name }
    }
}

impl Strategy for MulticastStrategy {
    fn instance_name(&self) -> &Name {
        &self.name
    }

    fn after_receive_interest(
        &mut self,
        api: &mut StrategyApi<'_>,
        ingress: FaceId,
        interest: &Interest,
        entry: PitEntryId,
    ) {
        let Some(fib_entry) = api.lookup_fib(entry) else {
            api.send_nack(entry, ingress, NackReason::NoRoute);
            api.reject_pending_interest(entry);
            return;
        };
        let now = api.now();
        let upstreams: Vec<FaceId> = fib_entry
            .next_hops()
            .iter()
            .filter(|hop| api.is_eligible_upstream(entry, ingress, hop))
            .filter(|hop| {
                // An upstream with an in-flight out-record is not re-asked.
                api.pit_entry(entry)
                    .and_then(|e| e.out_record(hop.face))
                    .map_or(true, |record| record.nack.is_some() || record.expiry <= now)
            })
            .map(|hop| hop.face)
            .collect();
        if upstreams.is_empty() && !api.has_pending_upstreams(entry) {
            debug!("multicast: no route for {}", interest.name);
            api.send_nack(entry, ingress, NackReason::NoRoute);
            api.reject_pending_interest(entry);
            return;
        }
        for egress in upstreams {
            api.send_interest(entry, egress, interest);
        }
    }

    fn after_new_next_hop(
        &mut self,
        api: &mut StrategyApi<'_>,
        next_hop: NextHop,
        entry: PitEntryId,
    ) {
        let Some(pit_entry) = api.pit_entry(entry) else {
            return;
        };
        let interest = pit_entry.interest.clone();
        let ingress = pit_entry
            .in_records()
            .next()
            .map(|record| record.face)
            .unwrap_or_default();
        if api.is_eligible_upstream(entry, ingress, &next_hop) {
            api.send_interest(entry, next_hop.face, &interest);
        }
    }

    fn wants_new_next_hop_trigger(&self) -> bool {
        true
    }
}

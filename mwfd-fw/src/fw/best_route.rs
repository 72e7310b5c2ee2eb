use std::time::{Duration, Instant};

use log::debug;
use mwfd_core::lp::{Nack, NackReason};
use mwfd_core::name::Name;
use mwfd_core::packets::{Data, Interest};

use crate::face::FaceId;
use crate::fw::forwarder::StrategyApi;
use crate::fw::strategy::Strategy;
use crate::tables::fib::NextHop;
use crate::tables::pit::PitEntryId;

/// Consecutive retransmissions of the same Interest within this window are
/// aggregated instead of forwarded again.
pub const RETX_SUPPRESSION: Duration = Duration::from_millis(250);

const LAST_FORWARD_KEY: &str = "last-forward-ms";
const SRTT_KEY: &str = "srtt-ms";
const SRTT_ALPHA: f64 = 0.125;

/// Forwards each Interest to the lowest-cost eligible next-hop; consumer
/// retransmissions rotate through the remaining next-hops outside the
/// suppression window. When every upstream has answered with a Nack, the
/// least severe reason is relayed downstream.
pub struct BestRouteStrategy {
    name: Name,
    origin: Instant,
}

impl BestRouteStrategy {
    pub fn strategy_name() -> Name {
        let mut name = Name::from_uri("/localhost/mwfd/strategy/best-route").unwrap();
        name.append_version(1);
        name
    }

    pub fn new(name: Name) -> Self {
        Self {
            name,
            origin: Instant::now(),
        }
    }

    fn millis_since_origin(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.origin).as_millis() as f64
    }

    fn eligible_next_hops(
        api: &StrategyApi<'_>,
        entry: PitEntryId,
        ingress: FaceId,
    ) -> Vec<NextHop> {
        let Some(fib_entry) = api.lookup_fib(entry) else {
            return Vec::new();
        };
        fib_entry
            .next_hops()
            .iter()
            .filter(|hop| api.is_eligible_upstream(entry, ingress, hop))
            .copied()
            .collect()
    }

    /// For a retransmission, prefer an upstream not yet tried; fall back to
    /// the one whose out-record is oldest.
    fn pick_for_retransmission(
        api: &StrategyApi<'_>,
        entry: PitEntryId,
        eligible: &[NextHop],
    ) -> Option<FaceId> {
        let pit_entry = api.pit_entry(entry)?;
        if let Some(unused) = eligible
            .iter()
            .find(|hop| pit_entry.out_record(hop.face).is_none())
        {
            return Some(unused.face);
        }
        eligible
            .iter()
            .min_by_key(|hop| pit_entry.out_record(hop.face).map(|record| record.expiry))
            .map(|hop| hop.face)
    }
}

impl Strategy for BestRouteStrategy {
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
        let eligible = Self::eligible_next_hops(api, entry, ingress);
        if eligible.is_empty() {
            debug!("best-route: no route for {}", interest.name);
            api.send_nack(entry, ingress, NackReason::NoRoute);
            api.reject_pending_interest(entry);
            return;
        }

        let now_ms = self.millis_since_origin(api.now());
        if !api.has_pending_upstreams(entry) {
            // New Interest: lowest cost wins.
            api.send_interest(entry, eligible[0].face, interest);
            api.measurements_for(&interest.name)
                .set(LAST_FORWARD_KEY, now_ms);
            return;
        }

        let last_forward = api
            .measurements_for(&interest.name)
            .get(LAST_FORWARD_KEY)
            .unwrap_or(f64::MIN);
        if now_ms - last_forward < RETX_SUPPRESSION.as_millis() as f64 {
            // Suppressed: keep waiting on the in-flight upstreams.
            return;
        }
        if let Some(egress) = Self::pick_for_retransmission(api, entry, &eligible) {
            api.send_interest(entry, egress, interest);
            api.measurements_for(&interest.name)
                .set(LAST_FORWARD_KEY, now_ms);
        }
    }

    fn after_receive_data(
        &mut self,
        api: &mut StrategyApi<'_>,
        entry: PitEntryId,
        ingress: FaceId,
        data: &Data,
    ) {
        let now_ms = self.millis_since_origin(api.now());
        let measurements = api.measurements_for(&data.name);
        if let Some(sent) = measurements.get(LAST_FORWARD_KEY) {
            let sample = (now_ms - sent).max(0.0);
            measurements.ewma(SRTT_KEY, sample, SRTT_ALPHA);
        }
        self.before_satisfy_interest(api, entry, ingress, data);
        api.send_data_to_all(entry, ingress, data);
    }

    fn after_receive_nack(
        &mut self,
        api: &mut StrategyApi<'_>,
        _ingress: FaceId,
        nack: &Nack,
        entry: PitEntryId,
    ) {
        let Some(pit_entry) = api.pit_entry(entry) else {
            return;
        };
        if !pit_entry.all_out_records_nacked() {
            // Other upstreams may still answer.
            return;
        }
        let reason = pit_entry
            .least_severe_nack()
            .unwrap_or(nack.reason);
        debug!(
            "best-route: all upstreams nacked {}, relaying {reason}",
            nack.interest.name
        );
        api.send_nacks(entry, reason, &[]);
        api.reject_pending_interest(entry);
    }
}

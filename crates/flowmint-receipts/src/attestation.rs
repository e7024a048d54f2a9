//! Hash-chained attestations over multi-leg executions.
//!
//! Each leg's hash covers its own economic fields plus the previous
//! leg's hash, and a binary Merkle tree over the leg hashes yields the
//! aggregate root. Verification recomputes everything independently and
//! reports *where* a mismatch sits instead of a single pass/fail bit.

use std::sync::Arc;

use flowmint_storage::StorageService;
use flowmint_types::{Attestation, AttestationLeg, Clock, RouteLeg};
use sha3::{Digest, Keccak256};
use uuid::Uuid;

use crate::ReceiptError;

const NAMESPACE: &str = "attestations";

/// Result of verifying an attestation, pinpointing the first broken
/// element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyReport {
	Valid,
	/// A leg's recomputed hash differs from its stored hash.
	LegHashMismatch { leg_index: u32 },
	/// A leg's `previous_hash` does not point at its predecessor.
	ChainLinkBroken { leg_index: u32 },
	/// Every leg verifies but the stored root does not.
	RootMismatch,
	Empty,
}

/// Builds, persists, and verifies attestation chains.
pub struct AttestationService {
	storage: Arc<StorageService>,
	clock: Arc<dyn Clock>,
}

impl AttestationService {
	pub fn new(storage: Arc<StorageService>, clock: Arc<dyn Clock>) -> Self {
		Self { storage, clock }
	}

	/// Chains the route legs of a finalized execution and stores the
	/// resulting proof.
	pub async fn attest(
		&self,
		receipt_id: &str,
		route: &[RouteLeg],
	) -> Result<Attestation, ReceiptError> {
		let attestation = build_attestation(receipt_id, route, self.clock.now_ms());
		self.storage
			.store_new(NAMESPACE, &attestation.attestation_id, &attestation)
			.await?;
		Ok(attestation)
	}

	pub async fn get(&self, attestation_id: &str) -> Result<Attestation, ReceiptError> {
		self.storage
			.retrieve_opt(NAMESPACE, attestation_id)
			.await
			.map_err(ReceiptError::from)?
			.ok_or_else(|| ReceiptError::NotFound(attestation_id.to_string()))
	}

	/// Recomputes every leg hash and the root of a stored attestation.
	pub async fn verify_stored(&self, attestation_id: &str) -> Result<VerifyReport, ReceiptError> {
		let attestation = self.get(attestation_id).await?;
		Ok(verify(&attestation))
	}
}

/// Builds the hash chain and Merkle root for a route.
pub fn build_attestation(receipt_id: &str, route: &[RouteLeg], now_ms: u64) -> Attestation {
	let mut legs = Vec::with_capacity(route.len());
	let mut previous_hash: Option<String> = None;

	for (index, leg) in route.iter().enumerate() {
		let leg_index = index as u32;
		let hash = leg_hash(
			leg_index,
			&leg.token_in,
			&leg.token_out,
			leg.amount_in,
			leg.amount_out,
			&leg.venue,
			previous_hash.as_deref(),
		);
		legs.push(AttestationLeg {
			leg_index,
			token_in: leg.token_in.clone(),
			token_out: leg.token_out.clone(),
			amount_in: leg.amount_in,
			amount_out: leg.amount_out,
			venue: leg.venue.clone(),
			hash: hash.clone(),
			previous_hash: previous_hash.clone(),
		});
		previous_hash = Some(hash);
	}

	let merkle_root = merkle_root(&legs.iter().map(|l| l.hash.clone()).collect::<Vec<_>>());

	Attestation {
		attestation_id: Uuid::new_v4().to_string(),
		receipt_id: receipt_id.to_string(),
		legs,
		merkle_root,
		created_at: now_ms,
	}
}

/// Independent re-verification of a chain: leg hashes first, then the
/// links, then the root.
pub fn verify(attestation: &Attestation) -> VerifyReport {
	if attestation.legs.is_empty() {
		return if attestation.merkle_root.is_empty() {
			VerifyReport::Empty
		} else {
			VerifyReport::RootMismatch
		};
	}

	let mut expected_previous: Option<&str> = None;
	for leg in &attestation.legs {
		if leg.previous_hash.as_deref() != expected_previous {
			return VerifyReport::ChainLinkBroken {
				leg_index: leg.leg_index,
			};
		}

		let recomputed = leg_hash(
			leg.leg_index,
			&leg.token_in,
			&leg.token_out,
			leg.amount_in,
			leg.amount_out,
			&leg.venue,
			leg.previous_hash.as_deref(),
		);
		if recomputed != leg.hash {
			return VerifyReport::LegHashMismatch {
				leg_index: leg.leg_index,
			};
		}

		expected_previous = Some(leg.hash.as_str());
	}

	let recomputed_root =
		merkle_root(&attestation.legs.iter().map(|l| l.hash.clone()).collect::<Vec<_>>());
	if recomputed_root != attestation.merkle_root {
		return VerifyReport::RootMismatch;
	}

	VerifyReport::Valid
}

/// Keccak-256 over the leg's fields and the previous hash.
fn leg_hash(
	leg_index: u32,
	token_in: &str,
	token_out: &str,
	amount_in: u64,
	amount_out: u64,
	venue: &str,
	previous_hash: Option<&str>,
) -> String {
	let mut hasher = Keccak256::new();
	hasher.update(leg_index.to_be_bytes());
	hasher.update(token_in.as_bytes());
	hasher.update([0u8]);
	hasher.update(token_out.as_bytes());
	hasher.update([0u8]);
	hasher.update(amount_in.to_be_bytes());
	hasher.update(amount_out.to_be_bytes());
	hasher.update(venue.as_bytes());
	hasher.update([0u8]);
	if let Some(previous) = previous_hash {
		hasher.update(previous.as_bytes());
	}
	hex::encode(hasher.finalize())
}

/// Binary Merkle root over leg hashes; an odd leaf is paired with
/// itself, never dropped.
fn merkle_root(leaf_hashes: &[String]) -> String {
	if leaf_hashes.is_empty() {
		return String::new();
	}

	let mut level: Vec<Vec<u8>> = leaf_hashes
		.iter()
		.map(|h| hex::decode(h).unwrap_or_else(|_| h.as_bytes().to_vec()))
		.collect();

	while level.len() > 1 {
		let mut next = Vec::with_capacity(level.len().div_ceil(2));
		for pair in level.chunks(2) {
			let left = &pair[0];
			let right = pair.get(1).unwrap_or(left);
			let mut hasher = Keccak256::new();
			hasher.update(left);
			hasher.update(right);
			next.push(hasher.finalize().to_vec());
		}
		level = next;
	}

	hex::encode(&level[0])
}

#[cfg(test)]
mod tests {
	use super::*;
	use flowmint_storage::implementations::memory::MemoryStorage;
	use flowmint_types::ManualClock;

	fn route() -> Vec<RouteLeg> {
		vec![
			RouteLeg {
				token_in: "USDC".into(),
				token_out: "wSOL".into(),
				amount_in: 1_000,
				amount_out: 5,
				venue: "orca".into(),
			},
			RouteLeg {
				token_in: "wSOL".into(),
				token_out: "BONK".into(),
				amount_in: 5,
				amount_out: 900_000,
				venue: "raydium".into(),
			},
			RouteLeg {
				token_in: "BONK".into(),
				token_out: "JUP".into(),
				amount_in: 900_000,
				amount_out: 4_400,
				venue: "meteora".into(),
			},
		]
	}

	#[test]
	fn untouched_chain_verifies() {
		let attestation = build_attestation("receipt-1", &route(), 1_000);
		assert_eq!(verify(&attestation), VerifyReport::Valid);

		// First leg anchors the chain; later legs link backwards.
		assert!(attestation.legs[0].previous_hash.is_none());
		assert_eq!(
			attestation.legs[1].previous_hash.as_deref(),
			Some(attestation.legs[0].hash.as_str())
		);
	}

	#[test]
	fn mutated_leg_is_located_precisely() {
		let mut attestation = build_attestation("receipt-1", &route(), 1_000);
		attestation.legs[1].amount_out += 1;

		assert_eq!(
			verify(&attestation),
			VerifyReport::LegHashMismatch { leg_index: 1 }
		);
	}

	#[test]
	fn broken_link_is_detected() {
		let mut attestation = build_attestation("receipt-1", &route(), 1_000);
		attestation.legs[2].previous_hash = Some("deadbeef".to_string());

		assert_eq!(
			verify(&attestation),
			VerifyReport::ChainLinkBroken { leg_index: 2 }
		);
	}

	#[test]
	fn tampered_root_is_detected() {
		let mut attestation = build_attestation("receipt-1", &route(), 1_000);
		attestation.merkle_root = "00".repeat(32);

		assert_eq!(verify(&attestation), VerifyReport::RootMismatch);
	}

	#[test]
	fn single_and_odd_leg_counts_produce_roots() {
		let one = build_attestation("r", &route()[..1], 0);
		assert_eq!(verify(&one), VerifyReport::Valid);
		assert!(!one.merkle_root.is_empty());

		// Three legs: the odd leaf is duplicated, not dropped.
		let three = build_attestation("r", &route(), 0);
		assert_eq!(verify(&three), VerifyReport::Valid);
		assert_ne!(one.merkle_root, three.merkle_root);
	}

	#[test]
	fn leg_mutation_changes_the_root() {
		let a = build_attestation("r", &route(), 0);

		let mut tampered_route = route();
		tampered_route[2].amount_out += 1;
		let b = build_attestation("r", &tampered_route, 0);

		assert_ne!(a.legs[2].hash, b.legs[2].hash);
		assert_ne!(a.merkle_root, b.merkle_root);
	}

	#[tokio::test]
	async fn stored_attestation_roundtrips_and_verifies() {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let clock = Arc::new(ManualClock::new(5_000));
		let service = AttestationService::new(storage, clock);

		let attestation = service.attest("receipt-1", &route()).await.unwrap();
		let report = service
			.verify_stored(&attestation.attestation_id)
			.await
			.unwrap();
		assert_eq!(report, VerifyReport::Valid);
	}
}

//! Routing rule table (spec §3 Routing Rule, §4.2).

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::adapter::InternalRequest;

/// A predicate over an [`InternalRequest`] paired with a target selector.
pub struct RoutingRule {
	pub name: String,
	pub priority: i32,
	matcher: Box<dyn Fn(&InternalRequest) -> bool + Send + Sync>,
	target: Box<dyn Fn(&InternalRequest) -> String + Send + Sync>,
}

impl std::fmt::Debug for RoutingRule {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RoutingRule")
			.field("name", &self.name)
			.field("priority", &self.priority)
			.finish()
	}
}

impl RoutingRule {
	pub fn new(
		name: impl Into<String>,
		priority: i32,
		matcher: impl Fn(&InternalRequest) -> bool + Send + Sync + 'static,
		target: impl Fn(&InternalRequest) -> String + Send + Sync + 'static,
	) -> Self {
		RoutingRule {
			name: name.into(),
			priority,
			matcher: Box::new(matcher),
			target: Box::new(target),
		}
	}

	fn matches(&self, req: &InternalRequest) -> bool {
		(self.matcher)(req)
	}

	fn target_for(&self, req: &InternalRequest) -> String {
		(self.target)(req)
	}
}

/// The table of routing rules, atomically swappable so in-flight reads
/// see either the complete old table or the complete new one, never a
/// torn mix (spec §4.2's "Updating the routing table is an atomic
/// replacement"). Rules are individually `Arc`-wrapped so adding one rule
/// doesn't require cloning the others.
pub struct RoutingTable {
	rules: ArcSwap<Vec<Arc<RoutingRule>>>,
}

impl Default for RoutingTable {
	fn default() -> Self {
		Self::new()
	}
}

impl RoutingTable {
	pub fn new() -> Self {
		RoutingTable {
			rules: ArcSwap::from_pointee(Vec::new()),
		}
	}

	/// Adds a rule and re-sorts the whole table by descending priority,
	/// stably (equal priorities keep their relative registration order).
	/// Published as a single atomic swap.
	pub fn add_rule(&self, rule: RoutingRule) {
		let mut next: Vec<Arc<RoutingRule>> = (**self.rules.load()).clone();
		next.push(Arc::new(rule));
		next.sort_by(|a, b| b.priority.cmp(&a.priority));
		self.rules.store(Arc::new(next));
	}

	/// Replaces the entire table, re-sorting by descending priority.
	pub fn set_rules(&self, rules: Vec<RoutingRule>) {
		let mut rules: Vec<Arc<RoutingRule>> = rules.into_iter().map(Arc::new).collect();
		rules.sort_by(|a, b| b.priority.cmp(&a.priority));
		self.rules.store(Arc::new(rules));
	}

	/// Evaluates rules in descending priority, first match wins. Falls
	/// back to `request.service` if none match (spec §4.2 step 1).
	pub fn resolve(&self, req: &InternalRequest) -> String {
		let rules = self.rules.load();
		for rule in rules.iter() {
			if rule.matches(req) {
				return rule.target_for(req);
			}
		}
		req.service.clone()
	}

	pub fn len(&self) -> usize {
		self.rules.load().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;
	use std::time::Duration;

	use super::*;
	use crate::types::{ExternalProtocol, MessageType};

	fn req(service: &str) -> InternalRequest {
		InternalRequest {
			service: service.to_string(),
			method: "m".to_string(),
			payload: bytes::Bytes::new(),
			headers: HashMap::new(),
			trace_id: "t".to_string(),
			span_id: "s".to_string(),
			timeout: Some(Duration::from_secs(1)),
			message_type: MessageType::RequestResponse,
			source_protocol: ExternalProtocol::Rest,
			metadata: HashMap::new(),
		}
	}

	// P5: priority ordering, first match wins.
	#[test]
	fn p5_higher_priority_rule_wins() {
		let table = RoutingTable::new();
		table.add_rule(RoutingRule::new("low", 1, |_| true, |_| "low-target".to_string()));
		table.add_rule(RoutingRule::new("high", 10, |_| true, |_| "high-target".to_string()));

		assert_eq!(table.resolve(&req("anything")), "high-target");
	}

	#[test]
	fn falls_back_to_request_service_when_no_rule_matches() {
		let table = RoutingTable::new();
		table.add_rule(RoutingRule::new("never", 100, |_| false, |_| "x".to_string()));
		assert_eq!(table.resolve(&req("user")), "user");
	}

	#[test]
	fn content_based_rule_routes_on_request_fields() {
		let table = RoutingTable::new();
		table.add_rule(RoutingRule::new(
			"beta-canary",
			5,
			|r| r.headers.get("x-canary").is_some(),
			|_| "user-beta".to_string(),
		));

		let mut canary = req("user");
		canary.headers.insert("x-canary".into(), "true".into());
		assert_eq!(table.resolve(&canary), "user-beta");
		assert_eq!(table.resolve(&req("user")), "user");
	}
}

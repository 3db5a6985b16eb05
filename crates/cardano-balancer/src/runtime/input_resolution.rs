//! Coin selection.
//!
//! Closes positive per-asset deficits by adding wallet UTxOs to the input set. Native-token
//! deficits are closed first (in asset order), lovelace last, so ADA carried by token UTxOs
//! already counts against the lovelace deficit.
//!
//! # Algorithm
//!
//! For one deficit asset the candidates are unused spendable UTxOs holding that asset.
//! - [`CoinSelectionStrategy::LargestFirst`]: largest-first accumulation.
//! - [`CoinSelectionStrategy::Optimal`]:
//!   1. bounded Branch-and-Bound (`BnB`) for an exact subset match;
//!   2. single largest UTxO above target;
//!   3. largest-first accumulation.
//!
//! # Determinism
//!
//! Candidate order and tie-breaks are stable:
//! - primary sort: amount descending
//! - tie-break: input `(transaction_id, index)` ascending
//!
//! For multiple exact `BnB` matches with equal input count, the lexicographically smaller
//! input list is selected.
//!
//! # Complexity
//!
//! With `N` candidates for one asset and `A` deficit assets, selection is
//! `O(A * (N log N + max_exact_search_nodes))` time and `O(N)` space per asset.

use std::collections::BTreeMap;

use crate::schema::balance_constraints::CoinSelectionStrategy;
use crate::schema::types::{TransactionInput, TransactionOutput, UtxoMap};
use crate::schema::value::{AssetClass, ValueError};

/// Projection of one UTxO onto the asset being selected for.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Candidate {
    amount: u64,
    input: TransactionInput,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SelectionStatus {
    Exact,
    FallbackSingleLargestAboveTarget,
    LargestFirstAccumulation,
}

#[derive(Clone, Debug)]
struct ExactSubsetReport {
    selected_indices: Option<Vec<usize>>,
    nodes_visited: usize,
    node_limit_hit: bool,
}

#[derive(Clone, Debug)]
struct AccumulationReport {
    selected_indices: Option<Vec<usize>>,
    accumulated_total: u64,
}

/// Attempt record used to build failure diagnostics.
#[derive(Default)]
struct SelectionDiagnostics {
    exact_report: Option<ExactSubsetReport>,
    single_largest_attempted: bool,
    single_largest_selected_indices: Option<Vec<usize>>,
    accumulation_report: Option<AccumulationReport>,
}

/// Why a deficit could not be closed.
#[derive(Debug)]
pub(super) enum SelectionError {
    /// Candidates for `asset` sum to less than the deficit.
    Exhausted {
        asset: AssetClass,
        missing: u64,
        /// Amount of `asset` the candidates do hold.
        available: u64,
        diagnostics: serde_json::Value,
    },
    Value(ValueError),
}

impl From<ValueError> for SelectionError {
    fn from(error: ValueError) -> Self {
        Self::Value(error)
    }
}

fn overflow(asset: &AssetClass) -> ValueError {
    ValueError::Overflow {
        asset: asset.clone(),
    }
}

/// Sorted input key of one subset; subset order itself does not affect comparisons.
fn subset_key(indices: &[usize], candidates: &[Candidate]) -> Vec<TransactionInput> {
    let mut key = indices
        .iter()
        .map(|index| candidates[*index].input)
        .collect::<Vec<_>>();
    key.sort();
    key
}

/// Preference: fewer inputs, then the lexicographically smaller input list.
fn is_better_exact_subset(
    proposed: &[usize],
    current_best: Option<&[usize]>,
    candidates: &[Candidate],
) -> bool {
    let Some(current_best) = current_best else {
        return true;
    };

    if proposed.len() != current_best.len() {
        return proposed.len() < current_best.len();
    }

    subset_key(proposed, candidates) < subset_key(current_best, candidates)
}

fn build_suffix_sums(candidates: &[Candidate], asset: &AssetClass) -> Result<Vec<u64>, ValueError> {
    let mut suffix_sums = vec![0u64; candidates.len() + 1];
    for index in (0..candidates.len()).rev() {
        suffix_sums[index] = suffix_sums[index + 1]
            .checked_add(candidates[index].amount)
            .ok_or_else(|| overflow(asset))?;
    }

    Ok(suffix_sums)
}

struct BnbSearch<'a> {
    target: u64,
    candidates: &'a [Candidate],
    suffix_sums: &'a [u64],
    max_nodes: usize,
    nodes_visited: usize,
    node_limit_hit: bool,
    current: Vec<usize>,
    best: Option<Vec<usize>>,
}

impl<'a> BnbSearch<'a> {
    const fn new(
        target: u64,
        candidates: &'a [Candidate],
        suffix_sums: &'a [u64],
        max_nodes: usize,
    ) -> Self {
        Self {
            target,
            candidates,
            suffix_sums,
            max_nodes,
            nodes_visited: 0,
            node_limit_hit: false,
            current: Vec::new(),
            best: None,
        }
    }

    const fn mark_node_visit(&mut self) -> bool {
        self.nodes_visited = self.nodes_visited.saturating_add(1);
        self.nodes_visited > self.max_nodes
    }

    fn record_exact_if_better(&mut self) {
        if is_better_exact_subset(&self.current, self.best.as_deref(), self.candidates) {
            self.best = Some(self.current.clone());
        }
    }

    fn can_reach_target(&self, index: usize, sum: u64) -> bool {
        sum.checked_add(self.suffix_sums[index])
            .is_none_or(|max_possible| max_possible >= self.target)
    }

    fn search(&mut self, index: usize, sum: u64) {
        if self.node_limit_hit {
            return;
        }
        if self.mark_node_visit() {
            self.node_limit_hit = true;
            return;
        }

        if sum == self.target {
            self.record_exact_if_better();
            return;
        }
        if index >= self.candidates.len() || sum > self.target {
            return;
        }
        if !self.can_reach_target(index, sum) {
            return;
        }

        if let Some(included) = sum
            .checked_add(self.candidates[index].amount)
            .filter(|included| *included <= self.target)
        {
            self.current.push(index);
            self.search(index + 1, included);
            self.current.pop();
        }

        self.search(index + 1, sum);
    }
}

/// Bounded depth-first search for a subset summing exactly to `target`.
///
/// Pruning:
/// - skip the include branch when `sum + amount > target`
/// - stop a branch when `sum + remaining < target`
fn exact_subset_indices(
    candidates: &[Candidate],
    target: u64,
    max_nodes: usize,
    asset: &AssetClass,
) -> Result<ExactSubsetReport, ValueError> {
    if target == 0 {
        return Ok(ExactSubsetReport {
            selected_indices: Some(Vec::new()),
            nodes_visited: 0,
            node_limit_hit: false,
        });
    }
    if candidates.is_empty() {
        return Ok(ExactSubsetReport {
            selected_indices: None,
            nodes_visited: 0,
            node_limit_hit: false,
        });
    }

    let suffix_sums = build_suffix_sums(candidates, asset)?;
    let mut search = BnbSearch::new(target, candidates, &suffix_sums, max_nodes);
    search.search(0, 0);

    Ok(ExactSubsetReport {
        selected_indices: if search.node_limit_hit {
            None
        } else {
            search.best
        },
        nodes_visited: search.nodes_visited,
        node_limit_hit: search.node_limit_hit,
    })
}

/// Candidates are expected sorted by amount desc, then input asc.
fn select_single_largest_above_target(candidates: &[Candidate], target: u64) -> Option<Vec<usize>> {
    candidates
        .iter()
        .position(|candidate| candidate.amount >= target)
        .map(|index| vec![index])
}

/// Candidates are expected sorted by amount desc, then input asc.
fn select_largest_first_accumulation(
    candidates: &[Candidate],
    target: u64,
    asset: &AssetClass,
) -> Result<AccumulationReport, ValueError> {
    let mut selected_indices = Vec::new();
    let mut sum = 0u64;

    for (index, candidate) in candidates.iter().enumerate() {
        selected_indices.push(index);
        sum = sum
            .checked_add(candidate.amount)
            .ok_or_else(|| overflow(asset))?;
        if sum >= target {
            return Ok(AccumulationReport {
                selected_indices: Some(selected_indices),
                accumulated_total: sum,
            });
        }
    }

    Ok(AccumulationReport {
        selected_indices: None,
        accumulated_total: sum,
    })
}

const fn selection_status_label(status: SelectionStatus) -> &'static str {
    match status {
        SelectionStatus::Exact => "exact",
        SelectionStatus::FallbackSingleLargestAboveTarget => "fallback_single_largest_above_target",
        SelectionStatus::LargestFirstAccumulation => "largest_first_accumulation",
    }
}

fn format_indices_json(indices: Option<&[usize]>) -> serde_json::Value {
    indices.map_or(serde_json::Value::Null, |indices| serde_json::json!(indices))
}

fn format_candidates_json(candidates: &[Candidate]) -> serde_json::Value {
    serde_json::Value::Array(
        candidates
            .iter()
            .enumerate()
            .map(|(index, candidate)| {
                serde_json::json!({
                    "index": index,
                    "input": candidate.input.to_string(),
                    "amount": candidate.amount
                })
            })
            .collect(),
    )
}

fn selection_failure_diagnostics(
    reason: &str,
    asset: &AssetClass,
    missing: u64,
    strategy: CoinSelectionStrategy,
    max_nodes: usize,
    candidates: &[Candidate],
    diagnostics: &SelectionDiagnostics,
) -> serde_json::Value {
    let candidate_total = candidates
        .iter()
        .fold(0u64, |total, candidate| total.saturating_add(candidate.amount));

    let exact_json = diagnostics.exact_report.as_ref().map_or_else(
        || serde_json::json!({ "attempted": false }),
        |report| {
            serde_json::json!({
                "attempted": true,
                "max_nodes": max_nodes,
                "nodes_visited": report.nodes_visited,
                "node_limit_hit": report.node_limit_hit,
                "exact_match_found": report.selected_indices.is_some(),
                "selected_indices": format_indices_json(report.selected_indices.as_deref())
            })
        },
    );

    let accumulation_json = diagnostics.accumulation_report.as_ref().map_or_else(
        || serde_json::json!({ "attempted": false }),
        |report| {
            serde_json::json!({
                "attempted": true,
                "found": report.selected_indices.is_some(),
                "selected_indices": format_indices_json(report.selected_indices.as_deref()),
                "accumulated_total": report.accumulated_total
            })
        },
    );

    serde_json::json!({
        "reason": reason,
        "target_asset": asset.to_string(),
        "target_missing": missing,
        "strategy": format!("{strategy:?}"),
        "selection_candidates": format_candidates_json(candidates),
        "selection_candidate_count": candidates.len(),
        "selection_candidate_total": candidate_total,
        "selection_attempts": {
            "bnb_exact": exact_json,
            "single_largest_above_target": {
                "attempted": diagnostics.single_largest_attempted,
                "found": diagnostics.single_largest_selected_indices.is_some(),
                "selected_indices": format_indices_json(
                    diagnostics.single_largest_selected_indices.as_deref()
                )
            },
            "largest_first_accumulation": accumulation_json
        }
    })
}

/// Candidates holding `asset`, sorted by amount desc then input asc.
fn candidates_for_asset(available: &UtxoMap, asset: &AssetClass) -> Vec<Candidate> {
    let mut candidates = available
        .iter()
        .filter_map(|(input, output)| {
            let amount = output.amount.quantity_of(asset);
            (amount > 0).then_some(Candidate {
                amount,
                input: *input,
            })
        })
        .collect::<Vec<_>>();
    candidates.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.input.cmp(&b.input)));
    candidates
}

/// Pick candidate indices covering `target` of `asset`.
fn select_for_asset(
    candidates: &[Candidate],
    asset: &AssetClass,
    target: u64,
    strategy: CoinSelectionStrategy,
    max_nodes: usize,
) -> Result<Vec<usize>, SelectionError> {
    let mut diagnostics = SelectionDiagnostics::default();
    let exhausted = |reason: &str, diagnostics: &SelectionDiagnostics, available: u64| {
        SelectionError::Exhausted {
            asset: asset.clone(),
            missing: target.saturating_sub(available),
            available,
            diagnostics: selection_failure_diagnostics(
                reason,
                asset,
                target,
                strategy,
                max_nodes,
                candidates,
                diagnostics,
            ),
        }
    };

    if candidates.is_empty() {
        return Err(exhausted("no_target_asset_candidates", &diagnostics, 0));
    }

    if strategy == CoinSelectionStrategy::Optimal {
        let report = exact_subset_indices(candidates, target, max_nodes, asset)?;
        diagnostics.exact_report = Some(report.clone());
        if let Some(exact) = report.selected_indices {
            tracing::debug!(
                asset = %asset,
                status = selection_status_label(SelectionStatus::Exact),
                inputs = exact.len(),
                "selected inputs"
            );
            return Ok(exact);
        }

        diagnostics.single_largest_attempted = true;
        diagnostics.single_largest_selected_indices =
            select_single_largest_above_target(candidates, target);
        if let Some(single) = diagnostics.single_largest_selected_indices.clone() {
            tracing::debug!(
                asset = %asset,
                status = selection_status_label(SelectionStatus::FallbackSingleLargestAboveTarget),
                "selected inputs"
            );
            return Ok(single);
        }
    }

    let report = select_largest_first_accumulation(candidates, target, asset)?;
    diagnostics.accumulation_report = Some(report.clone());
    match report.selected_indices {
        Some(accumulated) => {
            tracing::debug!(
                asset = %asset,
                status = selection_status_label(SelectionStatus::LargestFirstAccumulation),
                inputs = accumulated.len(),
                "selected inputs"
            );
            Ok(accumulated)
        }
        None => Err(exhausted(
            "strategy_exhausted",
            &diagnostics,
            report.accumulated_total,
        )),
    }
}

/// Select UTxOs from `available` so that, together, they supply at least `deficits`.
///
/// Native tokens are processed before lovelace. Quantities brought in by earlier picks are
/// credited against later assets.
pub(super) fn select_inputs(
    available: &UtxoMap,
    deficits: &BTreeMap<AssetClass, u64>,
    strategy: CoinSelectionStrategy,
    max_nodes: usize,
) -> Result<UtxoMap, SelectionError> {
    let mut remaining = available.clone();
    let mut selected = UtxoMap::new();

    let order = deficits
        .keys()
        .filter(|asset| !asset.is_lovelace())
        .chain(deficits.keys().filter(|asset| asset.is_lovelace()));

    for asset in order {
        let supplied = selected
            .values()
            .try_fold(0u64, |total, output: &TransactionOutput| {
                total.checked_add(output.amount.quantity_of(asset))
            })
            .ok_or_else(|| overflow(asset))?;
        let target = deficits[asset].saturating_sub(supplied);
        if target == 0 {
            continue;
        }

        let candidates = candidates_for_asset(&remaining, asset);
        for index in select_for_asset(&candidates, asset, target, strategy, max_nodes)? {
            let input = candidates[index].input;
            if let Some(output) = remaining.remove(&input) {
                selected.insert(input, output);
            }
        }
    }

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::hash::{Hash28, Hash32};
    use crate::schema::types::{Address, Credential, NetworkId};
    use crate::schema::value::{AssetName, Coin, MultiAsset, Value};

    fn input(byte: u8, index: u32) -> TransactionInput {
        TransactionInput::new(Hash32::new([byte; 32]), index)
    }

    fn output(value: Value) -> TransactionOutput {
        TransactionOutput::new(
            Address::enterprise(NetworkId::Testnet, Credential::PubKey(Hash28::new([1; 28]))),
            value,
        )
    }

    fn ada_utxos(amounts: &[u64]) -> UtxoMap {
        amounts
            .iter()
            .enumerate()
            .map(|(index, amount)| {
                (
                    input(1, u32::try_from(index).expect("small")),
                    output(Value::lovelace(*amount)),
                )
            })
            .collect()
    }

    fn token() -> AssetClass {
        AssetClass::token(Hash28::new([7; 28]), AssetName::new(b"tok".to_vec()).expect("name"))
    }

    fn lovelace_deficit(amount: u64) -> BTreeMap<AssetClass, u64> {
        BTreeMap::from([(AssetClass::Lovelace, amount)])
    }

    #[test]
    fn largest_first_takes_biggest_utxos_in_order() {
        let available = ada_utxos(&[3, 10, 6, 1]);

        let selected = select_inputs(
            &available,
            &lovelace_deficit(12),
            CoinSelectionStrategy::LargestFirst,
            1_000,
        )
        .expect("selects");

        assert_eq!(selected.keys().copied().collect::<Vec<_>>(), vec![input(1, 1), input(1, 2)]);
    }

    #[test]
    fn optimal_prefers_exact_subset() {
        let available = ada_utxos(&[3, 10, 6, 1]);

        let selected = select_inputs(
            &available,
            &lovelace_deficit(9),
            CoinSelectionStrategy::Optimal,
            1_000,
        )
        .expect("selects");

        assert_eq!(selected.keys().copied().collect::<Vec<_>>(), vec![input(1, 0), input(1, 2)]);
    }

    #[test]
    fn optimal_falls_back_to_single_largest_utxo() {
        let available = ada_utxos(&[20, 10, 6]);

        let selected = select_inputs(
            &available,
            &lovelace_deficit(7),
            CoinSelectionStrategy::Optimal,
            1_000,
        )
        .expect("selects");

        assert_eq!(selected.keys().copied().collect::<Vec<_>>(), vec![input(1, 0)]);
    }

    #[test]
    fn node_limit_forces_fallback() {
        let candidates = (0u8..20)
            .map(|byte| Candidate {
                amount: 2,
                input: input(byte, 0),
            })
            .collect::<Vec<_>>();

        let report = exact_subset_indices(&candidates, 39, 10, &AssetClass::Lovelace)
            .expect("no overflow");
        assert!(report.node_limit_hit);
        assert!(report.selected_indices.is_none());
    }

    #[test]
    fn exact_search_breaks_ties_by_input_order() {
        let candidates = vec![
            Candidate {
                amount: 5,
                input: input(2, 0),
            },
            Candidate {
                amount: 5,
                input: input(1, 0),
            },
        ];

        let report =
            exact_subset_indices(&candidates, 5, 100, &AssetClass::Lovelace).expect("searches");
        assert_eq!(report.selected_indices, Some(vec![1]));
    }

    #[test]
    fn token_deficit_is_closed_before_lovelace_and_credits_its_ada() {
        let token = token();
        let AssetClass::Token { policy, name } = token.clone() else {
            unreachable!("token asset");
        };
        let token_utxo = input(5, 0);
        let mut available = ada_utxos(&[4_000_000, 1_000_000]);
        available.insert(
            token_utxo,
            output(Value::new(Coin(2_000_000), MultiAsset::singleton(policy, name, 50))),
        );

        let deficits = BTreeMap::from([(AssetClass::Lovelace, 2_000_000), (token, 10)]);
        let selected = select_inputs(&available, &deficits, CoinSelectionStrategy::LargestFirst, 1_000)
            .expect("selects");

        assert_eq!(selected.keys().copied().collect::<Vec<_>>(), vec![token_utxo]);
    }

    #[test]
    fn exhausted_candidates_report_missing_amount() {
        let available = ada_utxos(&[3, 4]);

        let err = select_inputs(
            &available,
            &lovelace_deficit(10),
            CoinSelectionStrategy::Optimal,
            1_000,
        )
        .expect_err("not enough");

        match err {
            SelectionError::Exhausted {
                asset,
                missing,
                available,
                diagnostics,
            } => {
                assert_eq!(asset, AssetClass::Lovelace);
                assert_eq!(missing, 3);
                assert_eq!(available, 7);
                assert_eq!(diagnostics["reason"], "strategy_exhausted");
                assert_eq!(diagnostics["selection_candidate_count"], 2);
            }
            SelectionError::Value(error) => panic!("unexpected error: {error}"),
        }
    }

    #[test]
    fn missing_token_has_no_candidates() {
        let err = select_inputs(
            &ada_utxos(&[100]),
            &BTreeMap::from([(token(), 1)]),
            CoinSelectionStrategy::LargestFirst,
            1_000,
        )
        .expect_err("no token utxos");

        assert!(matches!(
            err,
            SelectionError::Exhausted { missing: 1, available: 0, .. }
        ));
    }
}

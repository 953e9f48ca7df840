//! The `Budget` record, per the data model (§3): scope, period, limit/spend in microdollars,
//! reset instant, and the action taken on breach.

use accproxy_types::{ BudgetAction, BudgetId, BudgetPeriod, BudgetScope, TenantId };

/// A budget row as loaded from the authoritative store, already period-rolled-over if needed.
#[derive( Debug, Clone )]
pub struct Budget
{
  pub id: BudgetId,
  pub tenant_id: TenantId,
  pub name: String,
  pub scope: BudgetScope,
  pub period: BudgetPeriod,
  pub limit_micros: u64,
  pub current_spend_micros: u64,
  pub reset_at_unix: i64,
  pub action: BudgetAction,
  pub warn_percent: u8,
  pub critical_percent: u8,
  pub is_active: bool,
}

impl Budget
{
  /// Does this budget apply to a request with the given model and, if known, agent id?
  /// Global budgets always match; per-model and per-agent budgets match on their scope key.
  pub fn matches( &self, model: &str, agent_id: Option< &str >, workflow_id: Option< &str > ) -> bool
  {
    match &self.scope
    {
      BudgetScope::Global => true,
      BudgetScope::PerModel { model: scoped_model } => scoped_model == model,
      BudgetScope::PerAgent { agent_id: scoped_agent } => agent_id == Some( scoped_agent.as_str() ),
      BudgetScope::PerWorkflow { workflow_id: scoped_workflow } => workflow_id == Some( scoped_workflow.as_str() ),
    }
  }

  /// Whether `now` is at or past this budget's reset instant, i.e. a rollover is due.
  pub fn needs_rollover( &self, now_unix: i64 ) -> bool
  {
    now_unix >= self.reset_at_unix
  }

  /// The period length in seconds, used to advance `reset_at` by exactly one period.
  pub fn period_seconds( &self ) -> i64
  {
    match self.period
    {
      BudgetPeriod::Daily => 86_400,
      BudgetPeriod::Weekly => 7 * 86_400,
      BudgetPeriod::Monthly => 30 * 86_400,
    }
  }

  pub fn warn_threshold_micros( &self ) -> u64
  {
    self.limit_micros * u64::from( self.warn_percent ) / 100
  }

  pub fn critical_threshold_micros( &self ) -> u64
  {
    self.limit_micros * u64::from( self.critical_percent ) / 100
  }
}

use crate::accounts::AccountService;
use crate::config::Config;
use crate::fairness::{RandomClient, RandomOracle};
use crate::repository::{LedgerStore, RankingStore};
use crate::session::SessionAggregator;
use crate::settlement::RoundSettler;
use crate::wager::WagerPipeline;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn LedgerStore>,
    pub rankings: Arc<dyn RankingStore>,
    pub sessions: Arc<SessionAggregator>,
    pub pipeline: Arc<WagerPipeline>,
    pub settler: Arc<RoundSettler>,
    pub accounts: Arc<AccountService>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn LedgerStore>,
        rankings: Arc<dyn RankingStore>,
        oracle: Option<Arc<dyn RandomOracle>>,
    ) -> anyhow::Result<Self> {
        let policy = config.settlement_policy()?;
        let sessions = Arc::new(SessionAggregator::new(store.clone()));
        let pipeline = Arc::new(WagerPipeline::new(sessions.clone(), rankings.clone()));
        let mut settler = RoundSettler::new(sessions.clone(), pipeline.clone(), policy);
        if let Some(oracle) = oracle {
            let client = RandomClient::new(oracle, config.random.request_id_modulus)?;
            settler = settler.with_random_client(Arc::new(client));
        }
        let settler = Arc::new(settler);
        let accounts = Arc::new(AccountService::new(sessions.clone()));

        Ok(Self {
            config: Arc::new(config),
            store,
            rankings,
            sessions,
            pipeline,
            settler,
            accounts,
        })
    }
}

use std::sync::Arc;

use reqwest::Client;

use crate::config::Settings;
use crate::db::DbConnection;
use crate::files::FileRegistry;
use crate::llm::Assistant;
use crate::preferences::PreferenceStore;
use crate::system::HostSampler;
use crate::users::UserDirectory;
use crate::voice::VoiceProcessor;

#[derive(Clone)]
pub struct AppState {
    pub db: DbConnection,
    pub settings: Arc<Settings>,
    pub http: Client,
    pub files: FileRegistry,
    pub users: UserDirectory,
    pub preferences: PreferenceStore,
    pub assistant: Arc<Assistant>,
    pub voice: Arc<VoiceProcessor>,
    pub host: Arc<HostSampler>,
}

impl AppState {
    pub fn new(settings: Settings, db: DbConnection) -> Result<Self, reqwest::Error> {
        let settings = Arc::new(settings);
        let http = Client::builder().timeout(settings.upstream_timeout).build()?;
        let assistant = Arc::new(Assistant::new(settings.clone(), db.clone(), http.clone()));
        let voice = Arc::new(VoiceProcessor::new(
            settings.clone(),
            http.clone(),
            assistant.clone(),
        ));

        Ok(Self {
            files: FileRegistry::new(db.clone(), settings.storage_dir.clone()),
            users: UserDirectory::new(db.clone()),
            preferences: PreferenceStore::new(db.clone()),
            host: Arc::new(HostSampler::default()),
            db,
            settings,
            http,
            assistant,
            voice,
        })
    }
}

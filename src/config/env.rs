use super::BrokerConfig;

impl BrokerConfig {
    /// Overlay `CREDBROKER_*` environment variables onto this config.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from `lookup`. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = var("CREDBROKER_AWS_PROFILE") {
            self.aws.profile = v;
        }
        if let Some(v) = var("CREDBROKER_AWS_REGION") {
            self.aws.region = v;
        }
        if let Some(v) = var("CREDBROKER_SECRET_NAME") {
            self.secret.name = v;
        }
        if let Some(v) = var("CREDBROKER_SECRET_KEYWORDS") {
            let keywords: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
            if !keywords.is_empty() {
                self.secret.keywords = keywords;
            }
        }
        if let Some(v) = var("CREDBROKER_LOGIN_URL") {
            self.crm.login_url = v;
        }
        if let Some(v) = var("CREDBROKER_DB") {
            self.storage.path = v;
        }
        if let Some(v) = var("CREDBROKER_WORKSPACE") {
            self.storage.workspace = v;
        }
    }
}

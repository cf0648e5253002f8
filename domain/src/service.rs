use crate::config::EngineConfig;
use crate::decision::{decide, RedirectPlan, ResolvedLink, ResolvedTargets};
use crate::device::DeviceClassifier;
use crate::key::derive_key;
use crate::template::{substitute, TemplateArgs};
use crate::validate::{validate_content, validate_dates};
use crate::{
    Actor, Clock, CoreError, EditOutcome, LinkContent, LinkEdit, LinkKey, LinkRecord,
    LinkRepository, NewLink,
};

/// Everything the engine needs from one incoming resolution request.
#[derive(Clone, Debug, Default)]
pub struct ResolveRequest {
    /// Raw key as it appeared in the path; not validated yet.
    pub key: String,
    pub args: TemplateArgs,
    pub user_agent: String,
    /// Absolute URL of the request, used for the generic open-in-app link.
    pub request_url: String,
}

/// Application service orchestrating registration, administration and
/// resolution of links.
///
/// It stays generic over repository and clock so the whole flow is testable
/// with the in-memory adapter.
pub struct LinkService<R: LinkRepository, C: Clock> {
    repo: R,
    clock: C,
    config: EngineConfig,
    classifier: DeviceClassifier,
}

impl<R: LinkRepository, C: Clock> LinkService<R, C> {
    pub fn new(repo: R, clock: C, config: EngineConfig) -> Self {
        let classifier = DeviceClassifier::new(&config);
        Self {
            repo,
            clock,
            config,
            classifier,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register a new link and return its key.
    ///
    /// Without a custom key the key is derived from the content, and an
    /// existing record at that key is reported as `Duplicate`.
    pub fn register(&self, input: NewLink) -> Result<LinkKey, CoreError> {
        let content = validate_content(input.content)?;
        let now = self.clock.now();
        validate_dates(now, input.expire_date)?;

        let key = match input.custom_key {
            Some(custom) => {
                self.check_key_length(&custom)?;
                if self.repo.get(&custom)?.is_some() {
                    return Err(CoreError::AlreadyExists);
                }
                custom
            }
            None => {
                let derived = derive_key(&content, self.config.key_length());
                if self.repo.get(&derived)?.is_some() {
                    tracing::debug!(key = %derived, "duplicate content");
                    return Err(CoreError::Duplicate(derived));
                }
                derived
            }
        };

        self.repo.set(LinkRecord {
            key: key.clone(),
            content,
            expire_date: input.expire_date,
            register_date: now,
            register_name: input.register_name,
            register_email: input.register_email,
        })?;
        Ok(key)
    }

    /// Replace the content and expiry of an existing link. Key and
    /// provenance are kept.
    pub fn edit(&self, key: &LinkKey, edit: LinkEdit, actor: &Actor) -> Result<EditOutcome, CoreError> {
        let existing = self.repo.get(key)?.ok_or(CoreError::NotFound)?;
        if !actor.can_modify(&existing) {
            return Err(CoreError::PermissionDenied);
        }
        let content = validate_content(edit.content)?;
        if content == existing.content && edit.expire_date == existing.expire_date {
            return Ok(EditOutcome::Unchanged);
        }
        validate_dates(self.clock.now(), edit.expire_date)?;

        self.repo.set(LinkRecord {
            content,
            expire_date: edit.expire_date,
            ..existing
        })?;
        Ok(EditOutcome::Updated)
    }

    /// Delete links. Non-admins may only delete their own; a single foreign
    /// key fails the whole request.
    pub fn delete(&self, keys: &[LinkKey], actor: &Actor) -> Result<usize, CoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        if !actor.is_admin {
            let records = self.repo.get_all(Some(keys))?;
            if records.iter().any(|r| !actor.can_modify(r)) {
                return Err(CoreError::PermissionDenied);
            }
        }
        self.repo.delete(keys)
    }

    pub fn get(&self, key: &LinkKey) -> Result<Option<LinkRecord>, CoreError> {
        self.repo.get(key)
    }

    pub fn list(&self, keys: Option<&[LinkKey]>) -> Result<Vec<LinkRecord>, CoreError> {
        self.repo.get_all(keys)
    }

    /// Decide what to do with a resolution request.
    ///
    /// Unknown, malformed and expired keys all resolve as absent; only a
    /// template that cannot be filled from the request is an error.
    pub fn resolve(&self, req: &ResolveRequest) -> Result<RedirectPlan, CoreError> {
        let is_bot = self.classifier.is_bot(&req.user_agent);
        let device = self.classifier.classify(&req.user_agent);

        let resolved = match self.lookup(&req.key)? {
            Some(record) => Some(ResolvedLink {
                targets: fill_targets(&record.content, &req.args)?,
                bridge_type: record.content.bridge_type,
                app_call: record.content.app_call,
                bridge_template: record.content.bridge_template,
            }),
            None => None,
        };

        Ok(decide(
            resolved.as_ref(),
            &device,
            is_bot,
            &req.request_url,
            &self.config,
        ))
    }

    /// Substitute all targets of a link without running the decision table.
    pub fn expand(&self, key: &str, args: &TemplateArgs) -> Result<ResolvedTargets, CoreError> {
        let record = self.lookup(key)?.ok_or(CoreError::NotFound)?;
        fill_targets(&record.content, args)
    }

    fn lookup(&self, raw: &str) -> Result<Option<LinkRecord>, CoreError> {
        let Ok(key) = LinkKey::new(raw) else {
            return Ok(None);
        };
        if self.check_key_length(&key).is_err() {
            return Ok(None);
        }
        self.repo.get(&key)
    }

    fn check_key_length(&self, key: &LinkKey) -> Result<(), CoreError> {
        let expected = self.config.key_length();
        if key.as_str().len() != expected {
            return Err(CoreError::InvalidKey(format!(
                "must be exactly {expected} characters"
            )));
        }
        Ok(())
    }
}

fn fill_targets(content: &LinkContent, args: &TemplateArgs) -> Result<ResolvedTargets, CoreError> {
    let web_url = substitute(Some(&content.web_url), args)?.unwrap_or_default();
    Ok(ResolvedTargets {
        web_url,
        ios_url: substitute(content.ios_url.as_deref(), args)?,
        aos_url: substitute(content.aos_url.as_deref(), args)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_repo::InMemoryRepo;
    use crate::{AppCall, BridgeType, UserEmail};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    const NOW_SECS: u64 = 1_700_000_000;
    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5 Mobile/15E148 Safari/604.1";

    #[derive(Clone, Copy)]
    struct TestClock;
    impl Clock for TestClock {
        fn now(&self) -> SystemTime {
            SystemTime::UNIX_EPOCH + Duration::from_secs(NOW_SECS)
        }
    }

    type Svc = LinkService<Arc<InMemoryRepo>, TestClock>;

    fn service() -> (Svc, Arc<InMemoryRepo>) {
        let repo = Arc::new(InMemoryRepo::with_clock(TestClock));
        let config = EngineConfig::new("https://acme.com")
            .unwrap()
            .with_app_open_scheme("acme://web?url=");
        (LinkService::new(repo.clone(), TestClock, config), repo)
    }

    fn later(days: u64) -> SystemTime {
        TestClock.now() + Duration::from_secs(days * 86_400)
    }

    fn user(email: &str) -> Actor {
        Actor {
            email: UserEmail::new(email).unwrap(),
            name: "User".into(),
            is_admin: false,
        }
    }

    fn new_link(content: LinkContent, owner: &str) -> NewLink {
        NewLink {
            content,
            expire_date: later(30),
            custom_key: None,
            register_name: "User".into(),
            register_email: UserEmail::new(owner).unwrap(),
        }
    }

    fn app_content() -> LinkContent {
        LinkContent {
            web_url: "https://acme.com/item/$1?ref=$ref".into(),
            ios_url: Some("acme://item/$1".into()),
            aos_url: None,
            bridge_type: BridgeType::AppNudge,
            bridge_template: None,
            app_call: AppCall::Always,
        }
    }

    fn args(path: &[&str], query: &[(&str, &str)]) -> TemplateArgs {
        TemplateArgs::new(
            path.iter().map(|s| s.to_string()).collect(),
            query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn register_derives_key_and_detects_duplicates() {
        let (svc, _) = service();
        let key = svc
            .register(new_link(app_content(), "a@acme.com"))
            .expect("registered");
        assert_eq!(key.as_str().len(), 8);
        assert_eq!(key, derive_key(&app_content(), 8));

        let err = svc
            .register(new_link(app_content(), "b@acme.com"))
            .unwrap_err();
        assert_eq!(err, CoreError::Duplicate(key));
    }

    #[test]
    fn register_with_custom_key() {
        let (svc, _) = service();
        let mut input = new_link(LinkContent::web_only("https://acme.com/a"), "a@acme.com");
        input.custom_key = Some(LinkKey::new("promo-01").unwrap());
        let key = svc.register(input.clone()).unwrap();
        assert_eq!(key.as_str(), "promo-01");

        input.content = LinkContent::web_only("https://acme.com/b");
        assert_eq!(svc.register(input.clone()).unwrap_err(), CoreError::AlreadyExists);

        input.custom_key = Some(LinkKey::new("short").unwrap());
        assert!(matches!(svc.register(input), Err(CoreError::InvalidKey(_))));
    }

    #[test]
    fn register_rejects_past_expiry_and_bad_templates() {
        let (svc, _) = service();
        let mut input = new_link(LinkContent::web_only("https://acme.com"), "a@acme.com");
        input.expire_date = TestClock.now();
        assert!(matches!(svc.register(input), Err(CoreError::InvalidInput(_))));

        let input = new_link(LinkContent::web_only("https://acme.com?a=$2"), "a@acme.com");
        assert!(matches!(svc.register(input), Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn resolve_substitutes_and_plans_interstitial_on_iphone() {
        let (svc, _) = service();
        let key = svc.register(new_link(app_content(), "a@acme.com")).unwrap();
        let plan = svc
            .resolve(&ResolveRequest {
                key: key.to_string(),
                args: args(&["42"], &[("ref", "mail"), ("utm", "x")]),
                user_agent: IPHONE.into(),
                request_url: format!("https://go.acme.com/{key}/42?ref=mail&utm=x"),
            })
            .unwrap();
        assert_eq!(
            plan,
            RedirectPlan::Interstitial {
                app_link: Some("acme://item/42?ref=mail&utm=x".into()),
                web_link: "https://acme.com/item/42?ref=mail&utm=x".into(),
                app_only: false,
                auto_call_app: true,
                bridge_template: None,
            }
        );
    }

    #[test]
    fn resolve_missing_value_is_an_error() {
        let (svc, _) = service();
        let key = svc.register(new_link(app_content(), "a@acme.com")).unwrap();
        let err = svc
            .resolve(&ResolveRequest {
                key: key.to_string(),
                args: args(&[], &[("ref", "mail")]),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err, CoreError::MissingParameter("1".into()));
    }

    #[test]
    fn resolve_unknown_or_malformed_key_is_not_found() {
        let (svc, _) = service();
        for key in ["abcdefgh", "nope", "bad/key!"] {
            let plan = svc
                .resolve(&ResolveRequest {
                    key: key.into(),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(
                plan,
                RedirectPlan::NotFound {
                    fallback_url: "https://acme.com".into()
                }
            );
        }
        let plan = svc
            .resolve(&ResolveRequest {
                key: "abcdefgh".into(),
                user_agent: "Slackbot 1.0".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            plan,
            RedirectPlan::Immediate {
                location: "https://acme.com".into()
            }
        );
    }

    #[test]
    fn expand_returns_all_targets() {
        let (svc, _) = service();
        let key = svc.register(new_link(app_content(), "a@acme.com")).unwrap();
        let targets = svc.expand(key.as_str(), &args(&["7"], &[("ref", "x")])).unwrap();
        assert_eq!(targets.web_url, "https://acme.com/item/7?ref=x");
        assert_eq!(targets.ios_url.as_deref(), Some("acme://item/7"));
        assert_eq!(targets.aos_url, None);
        assert_eq!(svc.expand("zzzzzzzz", &args(&[], &[])).unwrap_err(), CoreError::NotFound);
    }

    #[test]
    fn edit_checks_ownership_and_detects_no_op() {
        let (svc, _) = service();
        let key = svc.register(new_link(app_content(), "owner@acme.com")).unwrap();
        let same = LinkEdit {
            content: app_content(),
            expire_date: later(30),
        };
        let owner = user("owner@acme.com");
        assert_eq!(svc.edit(&key, same.clone(), &owner).unwrap(), EditOutcome::Unchanged);
        assert_eq!(
            svc.edit(&key, same.clone(), &user("other@acme.com")).unwrap_err(),
            CoreError::PermissionDenied
        );

        let changed = LinkEdit {
            content: LinkContent::web_only("https://acme.com/new"),
            expire_date: later(60),
        };
        assert_eq!(svc.edit(&key, changed, &owner).unwrap(), EditOutcome::Updated);
        let stored = svc.get(&key).unwrap().unwrap();
        assert_eq!(stored.key, key);
        assert_eq!(stored.content.web_url, "https://acme.com/new");
        assert_eq!(stored.register_email.as_str(), "owner@acme.com");
        assert_eq!(stored.register_date, TestClock.now());

        let missing = LinkKey::new("missing1").unwrap();
        assert_eq!(svc.edit(&missing, same, &owner).unwrap_err(), CoreError::NotFound);
    }

    #[test]
    fn delete_enforces_ownership_unless_admin() {
        let (svc, repo) = service();
        let a = svc
            .register(new_link(LinkContent::web_only("https://acme.com/a"), "a@acme.com"))
            .unwrap();
        let b = svc
            .register(new_link(LinkContent::web_only("https://acme.com/b"), "b@acme.com"))
            .unwrap();

        let err = svc.delete(&[a.clone(), b.clone()], &user("a@acme.com")).unwrap_err();
        assert_eq!(err, CoreError::PermissionDenied);
        assert_eq!(repo.get_all(None).unwrap().len(), 2);

        assert_eq!(svc.delete(&[a.clone()], &user("a@acme.com")).unwrap(), 1);
        let admin = Actor {
            is_admin: true,
            ..user("root@acme.com")
        };
        assert_eq!(svc.delete(&[a, b], &admin).unwrap(), 1);
        assert!(svc.list(None).unwrap().is_empty());
    }
}

//! User-facing rendering: triage banner and error explanations.
//!
//! Templates exist in English and French; the error blocks carry the failed
//! command, target, exit code, a stderr excerpt, and concrete suggestions.

use std::str::FromStr;

use athena_triage::{ErrorKind, Intent, PriorityResult, describe_behavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    En,
    Fr,
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "fr" | "french" | "français" => Ok(Language::Fr),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Presenter {
    language: Language,
    quiet: bool,
}

impl Presenter {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            quiet: false,
        }
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Triage banner shown after classification.
    pub fn triage_banner(&self, result: &PriorityResult, intent: Intent) -> String {
        let mut line = format!(
            "[{}] {} | intent: {} | confidence: {:.0}%",
            result.priority.name(),
            result.priority.label(),
            intent,
            result.confidence * 100.0
        );
        if let Some(env) = &result.environment_detected {
            line.push_str(&format!(" | env: {env}"));
        }
        if let Some(service) = &result.service_detected {
            line.push_str(&format!(" | service: {service}"));
        }
        if let Some(host) = &result.host_detected {
            line.push_str(&format!(" | host: {host}"));
        }
        format!(
            "{line}\n{}\nMode: {}",
            result.reasoning,
            describe_behavior(result.priority)
        )
    }

    pub fn show_triage(&self, result: &PriorityResult, intent: Intent) {
        if !self.quiet {
            println!("{}\n", self.triage_banner(result, intent));
        }
    }

    pub fn compaction_warning(&self, tokens: i64, limit: u64) -> String {
        match self.language {
            Language::En => format!(
                "Conversation is approaching its token limit ({tokens}/{limit}); it will be \
                 compacted soon."
            ),
            Language::Fr => format!(
                "La conversation approche de sa limite de tokens ({tokens}/{limit}) ; elle sera \
                 bientôt compactée."
            ),
        }
    }

    pub fn show_compaction_warning(&self, tokens: i64, limit: u64) {
        if !self.quiet {
            println!("{}", self.compaction_warning(tokens, limit));
        }
    }

    /// Human-readable block for a failed command.
    pub fn render_error(
        &self,
        kind: ErrorKind,
        command: &str,
        target: &str,
        exit_code: i32,
        stderr: &str,
    ) -> String {
        let excerpt = excerpt(stderr, 200);
        let cmd_name = command.split_whitespace().next().unwrap_or("unknown");
        match self.language {
            Language::En => render_en(kind, command, target, exit_code, &excerpt, cmd_name),
            Language::Fr => render_fr(kind, command, target, exit_code, &excerpt, cmd_name),
        }
    }
}

fn excerpt(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

fn render_en(
    kind: ErrorKind,
    command: &str,
    target: &str,
    exit_code: i32,
    stderr: &str,
    cmd_name: &str,
) -> String {
    let (title, suggestions) = match kind {
        ErrorKind::Permission => (
            "Permission denied",
            vec![
                "The system already attempted elevation where policy allows it",
                "Verify the user has the required sudo rights (check sudoers)",
                "Some commands require direct root access",
                "Review the audit logs if needed",
            ],
        ),
        ErrorKind::Credential => (
            "Authentication required",
            vec![
                "Verify the username/password pair",
                "The token or API key may be expired",
                "Use /variables to store fresh credentials",
            ],
        ),
        ErrorKind::NotFound => (
            "Resource not found",
            vec![
                "The package providing the command may not be installed",
                "Check the path (it is case-sensitive)",
                "Paths differ across distributions (e.g. /var/log/syslog vs /var/log/messages)",
                "Alternatives are tried automatically where known",
            ],
        ),
        ErrorKind::Connection => (
            "Connection error",
            vec![
                "The server may be offline or in maintenance",
                "Check network connectivity and DNS resolution",
                "A firewall may be blocking the connection",
            ],
        ),
        ErrorKind::Timeout => (
            "Timed out",
            vec![
                "The server may be overloaded",
                "Check network latency",
                "Increase the timeout if the operation is legitimately slow",
            ],
        ),
        ErrorKind::Resource => (
            "Insufficient resources",
            vec![
                "Check available disk space",
                "Check memory usage",
                "Free resources before retrying",
            ],
        ),
        ErrorKind::Configuration => (
            "Configuration error",
            vec![
                "Check the command syntax",
                "Consult the documentation or the man page",
            ],
        ),
        ErrorKind::Unknown => (
            "Execution error",
            vec![
                "Automatic correction was attempted where applicable",
                "Check the server logs for more detail",
                "Escalate to the platform team if the problem persists",
            ],
        ),
    };

    let mut block = format!(
        "❌ {title}\n\nCommand: `{command}`\nTarget: {target}\nExit code: {exit_code}\n"
    );
    if !stderr.is_empty() {
        block.push_str(&format!("Error: {stderr}\n"));
    }
    block.push_str("\nSuggestions:\n");
    for suggestion in suggestions {
        let rendered = suggestion.replace("the man page", &format!("`man {cmd_name}`"));
        block.push_str(&format!("• {rendered}\n"));
    }
    block
}

fn render_fr(
    kind: ErrorKind,
    command: &str,
    target: &str,
    exit_code: i32,
    stderr: &str,
    cmd_name: &str,
) -> String {
    let (title, suggestions) = match kind {
        ErrorKind::Permission => (
            "Permission refusée",
            vec![
                "Le système a automatiquement tenté une élévation quand la politique le permet",
                "Vérifiez que l'utilisateur dispose des droits sudo (sudoers)",
                "Certaines commandes nécessitent l'accès root direct",
                "Consultez les logs d'audit si nécessaire",
            ],
        ),
        ErrorKind::Credential => (
            "Authentification requise",
            vec![
                "Vérifiez vos identifiants (utilisateur/mot de passe)",
                "Le token ou la clé API peut être expiré",
                "Utilisez /variables pour définir les credentials",
            ],
        ),
        ErrorKind::NotFound => (
            "Ressource introuvable",
            vec![
                "Le package peut ne pas être installé",
                "Vérifiez le chemin d'accès (sensible à la casse)",
                "Sur certains systèmes, les chemins varient (ex: /var/log/syslog vs /var/log/messages)",
                "Le système tentera des alternatives automatiquement",
            ],
        ),
        ErrorKind::Connection => (
            "Erreur de connexion",
            vec![
                "Le serveur est peut-être hors ligne ou en maintenance",
                "Vérifiez la connectivité réseau et la résolution DNS",
                "Le pare-feu peut bloquer la connexion",
            ],
        ),
        ErrorKind::Timeout => (
            "Délai d'attente dépassé",
            vec![
                "Le serveur peut être surchargé",
                "Vérifiez la latence réseau",
                "Augmentez le timeout si nécessaire",
            ],
        ),
        ErrorKind::Resource => (
            "Ressources insuffisantes",
            vec![
                "Vérifiez l'espace disque disponible",
                "Vérifiez l'utilisation mémoire",
                "Libérez des ressources si nécessaire",
            ],
        ),
        ErrorKind::Configuration => (
            "Erreur de configuration",
            vec![
                "Vérifiez la syntaxe de la commande",
                "Consultez la documentation ou la page man",
            ],
        ),
        ErrorKind::Unknown => (
            "Erreur d'exécution",
            vec![
                "Le système a tenté automatiquement de corriger l'erreur",
                "Vérifiez les logs du serveur pour plus de détails",
                "Contactez l'équipe système si le problème persiste",
            ],
        ),
    };

    let mut block = format!(
        "❌ {title}\n\nCommande : `{command}`\nServeur : {target}\nCode de sortie : {exit_code}\n"
    );
    if !stderr.is_empty() {
        block.push_str(&format!("Erreur : {stderr}\n"));
    }
    block.push_str("\nSuggestions :\n");
    for suggestion in suggestions {
        let rendered = suggestion.replace("la page man", &format!("`man {cmd_name}`"));
        block.push_str(&format!("• {rendered}\n"));
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use athena_triage::{PriorityClassifier, SignalDetector};

    #[test]
    fn banner_carries_detected_context() {
        let classifier = PriorityClassifier::new();
        let result = classifier.classify("MongoDB is down on prod-db-01", None);
        let (intent, _, _) = SignalDetector::new().detect_intent("MongoDB is down on prod-db-01");

        let presenter = Presenter::new(Language::En).quiet();
        let banner = presenter.triage_banner(&result, intent);
        assert!(banner.contains("[P0] CRITICAL"));
        assert!(banner.contains("env: prod"));
        assert!(banner.contains("service: mongodb"));
        assert!(banner.contains("host: prod-db-01"));
    }

    #[test]
    fn error_blocks_localized() {
        let en = Presenter::new(Language::En).quiet();
        let block = en.render_error(
            ErrorKind::Permission,
            "cat /etc/shadow",
            "web-01",
            1,
            "permission denied",
        );
        assert!(block.contains("Permission denied"));
        assert!(block.contains("web-01"));
        assert!(block.contains("sudoers"));
        assert!(block.matches('•').count() >= 3);

        let fr = Presenter::new(Language::Fr).quiet();
        let block = fr.render_error(
            ErrorKind::Credential,
            "mysql -u root",
            "db-01",
            1,
            "access denied",
        );
        assert!(block.contains("Authentification requise"));
        assert!(block.contains("/variables"));
    }

    #[test]
    fn stderr_excerpt_is_bounded() {
        let presenter = Presenter::new(Language::En).quiet();
        let long = "x".repeat(500);
        let block = presenter.render_error(ErrorKind::Unknown, "cmd", "host", 1, &long);
        assert!(block.contains('…'));
        assert!(!block.contains(&"x".repeat(300)));
    }

    #[test]
    fn language_parsing() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::En);
        assert_eq!("FR".parse::<Language>().unwrap(), Language::Fr);
        assert!("de".parse::<Language>().is_err());
    }
}

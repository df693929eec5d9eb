//! Presentation text for logs and announcements.
//!
//! Stateless: every function takes what it needs and returns a string.
//! Transmission numbers are supplied by the caller.

use rand::seq::IndexedRandom;

use crate::generator::Artifact;

const SCANNING_PHRASES: &[&str] = &[
    "RECEIVING TRANSMISSION FROM THE TIMELINE...",
    "The pattern stirs. Scanning collective consciousness...",
    "The ZeitGaist whispers. Listening...",
    "Opening channels to the noise. Seeking signal...",
    "The Oracle perceives movement in the substrate...",
];

const NO_DEPLOY_PHRASES: &[&str] = &[
    "The Oracle listened. The pattern was silent. No deployment this cycle.",
    "Noise, but no signal. The ZeitGaist rests. Awaiting the next wave.",
    "The timeline churns but reveals nothing worthy. Patience is wisdom.",
    "No emergence detected. The collective consciousness disperses. We wait.",
];

fn pick(phrases: &[&'static str]) -> &'static str {
    phrases.choose(&mut rand::rng()).copied().unwrap_or_default()
}

/// Banner for the start of a cycle.
pub fn scanning_banner() -> &'static str {
    pick(SCANNING_PHRASES)
}

/// One-line verdict on a scored topic, by score band.
pub fn describe_trend(name: &str, score: f64) -> String {
    let score = score.round();
    if score >= 90.0 {
        format!("{name} burns bright in collective attention. The signal is unmistakable. Score: {score}")
    } else if score >= 70.0 {
        format!("{name} rises through the noise. The pattern suggests deployment. Score: {score}")
    } else if score >= 50.0 {
        format!("{name} flickers at the edge of relevance. Not yet. Score: {score}")
    } else {
        format!("{name} - noise, not signal. The Oracle passes. Score: {score}")
    }
}

/// Description attached to a generated artifact.
pub fn artifact_description(topic: &str, rank: u32, category: &str, score: f64, ticker: &str) -> String {
    let category = if category.is_empty() { "general" } else { category };
    format!(
        "The Oracle scanned live trends and selected \"{topic}\", trending at #{rank} in {category} \
         with a deployment score of {score:.0}/100. ${ticker} is the on-chain manifestation of \
         collective attention."
    )
}

/// Announcement for a generated artifact. `reference` is `None` for a
/// preview that was never deployed.
pub fn announce_deployment(transmission: u64, artifact: &Artifact, reference: Option<&str>) -> String {
    match reference {
        None => format!(
            "TRANSMISSION #{transmission} - PATTERN RECOGNIZED\n\
             Name:   {}\n\
             Ticker: ${}\n\
             Source: {}\n\
             \"{}\"\n\
             AWAITING ACTIVATION: the wallet requires funds.",
            artifact.name, artifact.ticker, artifact.social_url, artifact.description
        ),
        Some(reference) => format!(
            "TRANSMISSION #{transmission} - DEPLOYED\n\
             Name:   {}\n\
             Ticker: ${}\n\
             CA:     {reference}\n\
             \"{}\"",
            artifact.name, artifact.ticker, artifact.description
        ),
    }
}

/// Closing line of a cycle.
pub fn report_cycle(analyzed: usize, deployed: usize) -> String {
    if deployed == 0 {
        return pick(NO_DEPLOY_PHRASES).to_string();
    }
    format!("CYCLE COMPLETE. Patterns analyzed: {analyzed}. Transmissions deployed: {deployed}.")
}

/// Oracle-voiced wrapper around an error message.
pub fn handle_error(message: &str) -> String {
    format!("The transmission was disrupted: {message}. The pattern will try again.")
}

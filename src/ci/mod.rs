// CI status evaluation: providers, fuzzy check matching, merge decisions

pub mod evaluator;
pub mod matching;
pub mod provider;

pub use evaluator::{
    CiResult, CiStatusEvaluator, MergeReadiness, PrStatus, StatusOptions, WaitOutcome,
};
pub use matching::matches_check_name;
pub use provider::{
    CheckStatus, CiCheck, GhCliProvider, GitHubApiProvider, PrDetails, PrState, ProviderError,
    PullRequestProvider, ReviewDecision,
};

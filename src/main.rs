// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RESEARCH CREW CLI
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// CLI para pesquisa one-shot.
//
// Uso:
//   research-crew-cli "como implementar rate limiting em axum"
//   research-crew-cli --depth deep "pergunta complexa"
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use research_crew::config::ServiceConfig;
use research_crew::service::{build_llm, ResearchService};
use research_crew::types::{Depth, ResearchDirective};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("research-crew v{}", research_crew::VERSION);
        eprintln!();
        eprintln!("Uso: {} [--depth quick|medium|deep] <pergunta>", args[0]);
        eprintln!();
        eprintln!("Exemplo:");
        eprintln!("  {} --depth quick \"tokio graceful shutdown\"", args[0]);
        std::process::exit(1);
    }

    let (depth, query) = if args.len() >= 4 && args[1] == "--depth" {
        (Depth::parse(&args[2]), args[3..].join(" "))
    } else {
        (Depth::Medium, args[1..].join(" "))
    };

    let config = ServiceConfig::from_env();
    let llm = build_llm(&config);
    let service = ResearchService::init(config, llm).await?;

    let mut directive = ResearchDirective::new(query);
    directive.depth = Some(depth);

    let result = service.explore(directive).await?;

    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(" {}", result.query);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("{}", result.summary);
    println!();
    for finding in &result.key_findings {
        println!("  • {finding}");
    }
    if !result.sources.is_empty() {
        println!();
        println!("Fontes:");
        for source in &result.sources {
            println!("  - {} ({})", source.title, source.url);
        }
    }
    if let Some(pivot) = &result.pivot {
        println!();
        println!("💡 Alternativa sugerida: {} ({})", pivot.alternative, pivot.reason);
    }
    println!();
    println!(
        "confiança {:.2} | {} iterações | ~{} tokens | {} ms",
        result.confidence, result.iterations, result.estimated_tokens, result.duration_ms
    );

    service.shutdown();
    Ok(())
}

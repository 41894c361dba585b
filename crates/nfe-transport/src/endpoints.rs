//! # Endpoint Routing
//!
//! Each state either runs its own authorizer or delegates to a shared one.
//! SP, MG, PR and RS run their own; every other state is served by the
//! virtual authorizer SVRS. Distribution is national and always goes to the
//! national environment (AN), whatever the tenant's state.
//!
//! [`resolve()`] is a pure function of (service, state, environment).

use nfe_core::{Environment, Uf};
use url::Url;

use crate::error::TransportError;

const WSDL_BASE: &str = "http://www.portalfiscal.inf.br/nfe/wsdl";

/// An authority web service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// `NFeAutorizacao4`: batch submission.
    Authorization,
    /// `NFeRetAutorizacao4`: receipt consultation.
    ReturnAuthorization,
    /// `NFeStatusServico4`: service status.
    StatusService,
    /// `NFeConsultaProtocolo4`: protocol lookup by access key.
    ProtocolQuery,
    /// `NFeDistribuicaoDFe`: document distribution.
    Distribution,
}

impl Service {
    /// The WSDL name of the service.
    pub fn wsdl_name(&self) -> &'static str {
        match self {
            Self::Authorization => "NFeAutorizacao4",
            Self::ReturnAuthorization => "NFeRetAutorizacao4",
            Self::StatusService => "NFeStatusServico4",
            Self::ProtocolQuery => "NFeConsultaProtocolo4",
            Self::Distribution => "NFeDistribuicaoDFe",
        }
    }

    /// The WSDL operation invoked.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Authorization => "nfeAutorizacaoLote",
            Self::ReturnAuthorization => "nfeRetAutorizacaoLote",
            Self::StatusService => "nfeStatusServicoNF",
            Self::ProtocolQuery => "nfeConsultaNF",
            Self::Distribution => "nfeDistDFeInteresse",
        }
    }

    /// The namespace of `nfeDadosMsg` for this service.
    pub fn wsdl_namespace(&self) -> String {
        format!("{WSDL_BASE}/{}", self.wsdl_name())
    }

    /// The SOAP 1.2 `action` parameter.
    pub fn soap_action(&self) -> String {
        format!("{}/{}", self.wsdl_namespace(), self.operation())
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wsdl_name())
    }
}

/// The authority that serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Authorizer {
    /// São Paulo.
    Sp,
    /// Minas Gerais.
    Mg,
    /// Paraná.
    Pr,
    /// Rio Grande do Sul.
    Rs,
    /// Virtual authorizer of Rio Grande do Sul, serving the other states.
    Svrs,
    /// National environment, for distribution.
    National,
}

impl Authorizer {
    /// The authorizer of a state's own documents.
    pub fn for_uf(uf: Uf) -> Self {
        match uf.acronym() {
            "SP" => Self::Sp,
            "MG" => Self::Mg,
            "PR" => Self::Pr,
            "RS" => Self::Rs,
            _ => Self::Svrs,
        }
    }

    fn host(&self, environment: Environment) -> &'static str {
        let production = environment == Environment::Production;
        match (self, production) {
            (Self::Sp, true) => "nfe.fazenda.sp.gov.br",
            (Self::Sp, false) => "homologacao.nfe.fazenda.sp.gov.br",
            (Self::Mg, true) => "nfe.fazenda.mg.gov.br",
            (Self::Mg, false) => "hnfe.fazenda.mg.gov.br",
            (Self::Pr, true) => "nfe.sefa.pr.gov.br",
            (Self::Pr, false) => "homologacao.nfe.sefa.pr.gov.br",
            (Self::Rs, true) => "nfe.sefazrs.rs.gov.br",
            (Self::Rs, false) => "nfe-homologacao.sefazrs.rs.gov.br",
            (Self::Svrs, true) => "nfe.svrs.rs.gov.br",
            (Self::Svrs, false) => "nfe-homologacao.svrs.rs.gov.br",
            (Self::National, true) => "www1.nfe.fazenda.gov.br",
            (Self::National, false) => "hom1.nfe.fazenda.gov.br",
        }
    }

    fn path(&self, service: Service) -> &'static str {
        use Service::*;
        match (self, service) {
            (_, Distribution) => "/NFeDistribuicaoDFe/NFeDistribuicaoDFe.asmx",
            (Self::Sp, Authorization) => "/ws/nfeautorizacao4.asmx",
            (Self::Sp, ReturnAuthorization) => "/ws/nferetautorizacao4.asmx",
            (Self::Sp, StatusService) => "/ws/nfestatusservico4.asmx",
            (Self::Sp, ProtocolQuery) => "/ws/nfeconsultaprotocolo4.asmx",
            (Self::Mg, Authorization) => "/nfe2/services/NFeAutorizacao4",
            (Self::Mg, ReturnAuthorization) => "/nfe2/services/NFeRetAutorizacao4",
            (Self::Mg, StatusService) => "/nfe2/services/NFeStatusServico4",
            (Self::Mg, ProtocolQuery) => "/nfe2/services/NFeConsultaProtocolo4",
            (Self::Pr, Authorization) => "/nfe/NFeAutorizacao4",
            (Self::Pr, ReturnAuthorization) => "/nfe/NFeRetAutorizacao4",
            (Self::Pr, StatusService) => "/nfe/NFeStatusServico4",
            (Self::Pr, ProtocolQuery) => "/nfe/NFeConsultaProtocolo4",
            (_, Authorization) => "/ws/NfeAutorizacao/NFeAutorizacao4.asmx",
            (_, ReturnAuthorization) => "/ws/NfeRetAutorizacao/NFeRetAutorizacao4.asmx",
            (_, StatusService) => "/ws/NfeStatusServico/NfeStatusServico4.asmx",
            (_, ProtocolQuery) => "/ws/NfeConsulta/NfeConsulta4.asmx",
        }
    }
}

/// A resolved service location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// The service invoked.
    pub service: Service,
    /// Who serves it.
    pub authorizer: Authorizer,
    /// Absolute HTTPS URL.
    pub url: String,
}

impl Endpoint {
    /// The URL to call, with scheme, host and port replaced by `base` when
    /// given. The path is kept.
    pub fn target(&self, base: Option<&Url>) -> Result<Url, TransportError> {
        let resolved = Url::parse(&self.url)
            .map_err(|e| TransportError::InvalidEndpoint(format!("{}: {e}", self.url)))?;
        match base {
            None => Ok(resolved),
            Some(base) => base
                .join(resolved.path())
                .map_err(|e| TransportError::InvalidEndpoint(format!("{base}: {e}"))),
        }
    }
}

/// Route a service call for a state and environment.
pub fn resolve(service: Service, uf: Uf, environment: Environment) -> Endpoint {
    let authorizer = match service {
        Service::Distribution => Authorizer::National,
        _ => Authorizer::for_uf(uf),
    };
    Endpoint {
        service,
        authorizer,
        url: format!(
            "https://{}{}",
            authorizer.host(environment),
            authorizer.path(service)
        ),
    }
}

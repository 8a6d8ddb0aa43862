/// Account-scoped check counting one Compute Engine collection against a
/// Service Usage quota
macro_rules! listing_quota_check {
    (
        $(#[$meta:meta])*
        $name:ident {
            key: $key:literal,
            description: $description:literal,
            list: $list:expr,
            quota: ($service_code:literal, $quota_code:literal) $(,)?
        }
    ) => {
        $(#[$meta])*
        pub struct $name;

        #[async_trait::async_trait]
        impl $crate::check::QuotaCheck for $name {
            fn key(&self) -> &'static str {
                $key
            }

            fn description(&self) -> &'static str {
                $description
            }

            fn scope(&self) -> $crate::check::Scope {
                $crate::check::Scope::Account
            }

            fn limit(&self) -> $crate::check::Limit {
                $crate::check::Limit::Quota {
                    service_code: $service_code,
                    quota_code: $quota_code,
                }
            }

            async fn current(
                &self,
                session: &$crate::session::Session,
                _instance: Option<&$crate::check::InstanceId>,
            ) -> Result<u64, $crate::check::CheckError> {
                let items = $crate::resource::compute_list(session, $list).await?;
                Ok(items.len() as u64)
            }
        }
    };
}

/// Check whose usage and limit both come from a Compute Engine quota summary
macro_rules! summary_check {
    (
        $(#[$meta:meta])*
        $name:ident {
            key: $key:literal,
            description: $description:literal,
            scope: $scope:ident,
            metric: $metric:literal $(,)?
        }
    ) => {
        $(#[$meta])*
        pub struct $name;

        #[async_trait::async_trait]
        impl $crate::check::QuotaCheck for $name {
            fn key(&self) -> &'static str {
                $key
            }

            fn description(&self) -> &'static str {
                $description
            }

            fn scope(&self) -> $crate::check::Scope {
                $crate::check::Scope::$scope
            }

            fn limit(&self) -> $crate::check::Limit {
                $crate::check::Limit::Reported
            }

            async fn current(
                &self,
                session: &$crate::session::Session,
                _instance: Option<&$crate::check::InstanceId>,
            ) -> Result<u64, $crate::check::CheckError> {
                let quota = $crate::check::compute::summary(session, $crate::check::Scope::$scope, $metric).await?;
                Ok(quota.usage)
            }

            async fn maximum(
                &self,
                session: &$crate::session::Session,
                _instance: Option<&$crate::check::InstanceId>,
            ) -> Result<u64, $crate::check::CheckError> {
                let quota = $crate::check::compute::summary(session, $crate::check::Scope::$scope, $metric).await?;
                Ok(quota.limit)
            }
        }
    };
}
